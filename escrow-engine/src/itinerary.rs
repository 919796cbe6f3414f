//! Itinerary parsing - turns pasted booking text into flight segments
//!
//! Works line by line. A line with an airport pair (`LIM-JFK`, `LIM to JFK`)
//! becomes a segment; a date on a line without a pair applies to the
//! segments that follow it.

use crate::{error::EscrowError, EscrowResult};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{3})\s*(?:->|→|–|-|\bto\b)\s*([A-Z]{3})\b").expect("route pattern")
});
static FLIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{2}|[A-Z]\d|\d[A-Z])\s?(\d{1,4})\b").expect("flight pattern")
});
static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("date pattern"));
static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([01]\d|2[0-3]):([0-5]\d)\b").expect("time pattern"));

/// Input is truncated beyond this many bytes
pub const MAX_ITINERARY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightSegment {
    pub origin: String,
    pub destination: String,
    pub flight_number: Option<String>,
    pub date: Option<NaiveDate>,
    pub departure_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedItinerary {
    pub segments: Vec<FlightSegment>,
    /// First departure airport
    pub origin: String,
    /// Last arrival airport
    pub destination: String,
}

fn parse_date(line: &str) -> Option<NaiveDate> {
    DATE.captures(line)
        .and_then(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
}

pub fn parse_itinerary(text: &str) -> EscrowResult<ParsedItinerary> {
    let text = if text.len() > MAX_ITINERARY_BYTES {
        let mut end = MAX_ITINERARY_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    } else {
        text
    };

    let mut segments = Vec::new();
    let mut current_date = None;

    for line in text.lines() {
        let line_date = parse_date(line);

        let Some(route) = ROUTE.captures(line) else {
            if line_date.is_some() {
                current_date = line_date;
            }
            continue;
        };

        // Flight numbers must not be read out of the airport pair itself
        let rest = ROUTE.replace(line, " ");
        let flight_number = FLIGHT
            .captures(&rest)
            .map(|c| format!("{}{}", &c[1], &c[2]));
        let departure_time = TIME.captures(line).map(|c| format!("{}:{}", &c[1], &c[2]));

        segments.push(FlightSegment {
            origin: route[1].to_string(),
            destination: route[2].to_string(),
            flight_number,
            date: line_date.or(current_date),
            departure_time,
        });
    }

    match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => Ok(ParsedItinerary {
            origin: first.origin.clone(),
            destination: last.destination.clone(),
            segments,
        }),
        _ => Err(EscrowError::validation("no flight segments found in itinerary")),
    }
}
