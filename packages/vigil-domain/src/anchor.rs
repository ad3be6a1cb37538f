use std::sync::LazyLock;

use regex::Regex;

use crate::CandidateMetadata;

pub const DOB_ANCHOR: &str = "dob";
pub const DOCUMENT_ANCHOR: &str = "document_id";

const MIN_DOCUMENT_ID_CHARS: usize = 5;

static YEAR_FIRST: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"\b(\d{4})[-./](\d{1,2})[-./](\d{1,2})\b").ok());
static DAY_FIRST: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"\b(\d{1,2})[-./](\d{1,2})[-./](\d{4})\b").ok());
static YEAR_ONLY: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"^\s*(\d{4})\s*$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalendarDate {
	pub year: i32,
	pub month: u32,
	pub day: u32,
}

pub fn extract_dates(text: &str) -> Vec<CalendarDate> {
	let mut out = Vec::new();

	if let Some(re) = YEAR_FIRST.as_ref() {
		for caps in re.captures_iter(text) {
			push_date(&mut out, &caps[1], &caps[2], &caps[3]);
		}
	}
	if let Some(re) = DAY_FIRST.as_ref() {
		for caps in re.captures_iter(text) {
			push_date(&mut out, &caps[3], &caps[2], &caps[1]);
		}
	}

	out
}

/// True when the candidate's date of birth also appears in the raw query.
pub fn dob_matches(dob: &str, raw_query: &str) -> bool {
	let query_dates = extract_dates(raw_query);

	let year_only = YEAR_ONLY
		.as_ref()
		.and_then(|re| re.captures(dob))
		.and_then(|caps| caps[1].parse::<i32>().ok());

	if let Some(year) = year_only {
		return query_dates.iter().any(|date| date.year == year)
			|| raw_query.split(|ch: char| !ch.is_ascii_digit()).any(|part| part == dob.trim());
	}

	let dob_dates = extract_dates(dob);

	!dob_dates.is_empty() && dob_dates.iter().any(|date| query_dates.contains(date))
}

/// Returns the first document id that appears verbatim (ignoring separators) in the raw query.
pub fn document_id_match<'a>(document_ids: &'a [String], raw_query: &str) -> Option<&'a str> {
	let compact_query = compact_identifier(raw_query);

	if compact_query.is_empty() {
		return None;
	}

	document_ids
		.iter()
		.find(|id| {
			let compact = compact_identifier(id);

			compact.chars().count() >= MIN_DOCUMENT_ID_CHARS && compact_query.contains(&compact)
		})
		.map(String::as_str)
}

/// Anchors shared by candidate metadata and the raw query.
pub fn find_anchors(metadata: &CandidateMetadata, raw_query: &str) -> Vec<&'static str> {
	let mut out = Vec::new();

	if metadata.dob.as_deref().map(|dob| dob_matches(dob, raw_query)).unwrap_or(false) {
		out.push(DOB_ANCHOR);
	}
	if document_id_match(&metadata.document_ids, raw_query).is_some() {
		out.push(DOCUMENT_ANCHOR);
	}

	out
}

fn compact_identifier(text: &str) -> String {
	text.chars().filter(|ch| ch.is_alphanumeric()).flat_map(char::to_uppercase).collect()
}

fn push_date(out: &mut Vec<CalendarDate>, year: &str, month: &str, day: &str) {
	let (Ok(year), Ok(month), Ok(day)) = (year.parse(), month.parse(), day.parse()) else {
		return;
	};

	if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
		return;
	}

	let date = CalendarDate { year, month, day };

	if !out.contains(&date) {
		out.push(date);
	}
}
