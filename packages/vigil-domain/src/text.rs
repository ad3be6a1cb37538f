use std::collections::HashSet;

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};
use unicode_segmentation::UnicodeSegmentation;

/// Dedup and fusion key: lowercase, punctuation removed, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
	let mut stripped = String::with_capacity(text.len());

	for ch in text.chars() {
		if ch.is_alphanumeric() {
			stripped.extend(ch.to_lowercase());
		} else if ch.is_whitespace() {
			stripped.push(' ');
		}
	}

	stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Script-independent form used for similarity: diacritics dropped, Cyrillic transliterated.
pub fn fold_to_latin(text: &str) -> String {
	let mut out = String::with_capacity(text.len());

	for lower in text.chars().flat_map(char::to_lowercase) {
		if let Some(latin) = transliterate(lower) {
			out.push_str(latin);

			continue;
		}

		for ch in std::iter::once(lower).nfkd() {
			if !is_combining_mark(ch) {
				out.push(ch);
			}
		}
	}

	normalize_text(&out)
}

pub fn tokenize(text: &str) -> Vec<String> {
	let folded = fold_to_latin(text);
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for word in folded.unicode_words() {
		if word.chars().count() < 2 {
			continue;
		}
		if seen.insert(word) {
			out.push(word.to_string());
		}
	}

	out
}

/// Share of query tokens that also occur in the candidate text.
pub fn token_overlap_ratio(query: &str, text: &str) -> f32 {
	let query_tokens = tokenize(query);

	if query_tokens.is_empty() {
		return 0.0;
	}

	let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();

	if text_tokens.is_empty() {
		return 0.0;
	}

	let matched = query_tokens.iter().filter(|token| text_tokens.contains(*token)).count();

	matched as f32 / query_tokens.len() as f32
}

/// Normalized edit similarity in 0.0-1.0, order-insensitive over tokens.
pub fn fuzzy_ratio(left: &str, right: &str) -> f32 {
	let left = fold_to_latin(left);
	let right = fold_to_latin(right);

	if left.is_empty() && right.is_empty() {
		return 1.0;
	}
	if left.is_empty() || right.is_empty() {
		return 0.0;
	}

	let direct = levenshtein_ratio(&left, &right);
	let sorted = levenshtein_ratio(&sort_tokens(&left), &sort_tokens(&right));

	direct.max(sorted)
}

pub fn levenshtein_ratio(left: &str, right: &str) -> f32 {
	let left: Vec<char> = left.chars().collect();
	let right: Vec<char> = right.chars().collect();
	let longest = left.len().max(right.len());

	if longest == 0 {
		return 1.0;
	}

	let distance = levenshtein(&left, &right);

	(1.0 - distance as f32 / longest as f32).clamp(0.0, 1.0)
}

fn levenshtein(left: &[char], right: &[char]) -> usize {
	if left.is_empty() {
		return right.len();
	}
	if right.is_empty() {
		return left.len();
	}

	let mut prev: Vec<usize> = (0..=right.len()).collect();
	let mut curr = vec![0; right.len() + 1];

	for (i, lc) in left.iter().enumerate() {
		curr[0] = i + 1;

		for (j, rc) in right.iter().enumerate() {
			let cost = usize::from(lc != rc);

			curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
		}

		std::mem::swap(&mut prev, &mut curr);
	}

	prev[right.len()]
}

fn sort_tokens(text: &str) -> String {
	let mut tokens: Vec<&str> = text.split_whitespace().collect();

	tokens.sort_unstable();

	tokens.join(" ")
}

fn transliterate(ch: char) -> Option<&'static str> {
	let latin = match ch {
		'а' => "a",
		'б' => "b",
		'в' => "v",
		'г' | 'ґ' => "g",
		'д' => "d",
		'е' | 'э' => "e",
		'є' => "ye",
		'ё' => "yo",
		'ж' => "zh",
		'з' => "z",
		'и' | 'і' => "i",
		'ї' => "yi",
		'й' | 'ы' => "y",
		'к' => "k",
		'л' => "l",
		'м' => "m",
		'н' => "n",
		'о' => "o",
		'п' => "p",
		'р' => "r",
		'с' => "s",
		'т' => "t",
		'у' => "u",
		'ф' => "f",
		'х' => "kh",
		'ц' => "ts",
		'ч' => "ch",
		'ш' => "sh",
		'щ' => "shch",
		'ъ' | 'ь' | '\'' | 'ʼ' => "",
		'ю' => "yu",
		'я' => "ya",
		_ => return None,
	};

	Some(latin)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalize_strips_punctuation_and_collapses_whitespace() {
		assert_eq!(normalize_text("  Ivan,  PETROV!\tjr. "), "ivan petrov jr");
		assert_eq!(normalize_text("O'Brien"), "obrien");
	}

	#[test]
	fn folding_transliterates_cyrillic_and_drops_diacritics() {
		assert_eq!(fold_to_latin("Петро Порошенко"), "petro poroshenko");
		assert_eq!(fold_to_latin("José Müller"), "jose muller");
	}

	#[test]
	fn levenshtein_counts_single_edit() {
		let left: Vec<char> = "kitten".chars().collect();
		let right: Vec<char> = "sitting".chars().collect();

		assert_eq!(levenshtein(&left, &right), 3);
	}

	#[test]
	fn fuzzy_ratio_ignores_token_order() {
		assert!((fuzzy_ratio("Petrov Ivan", "Ivan Petrov") - 1.0).abs() < f32::EPSILON);
	}
}
