use bitmask_enum::bitmask;
use chrono::NaiveDate;
use nonempty::NonEmpty;

/// Dates are stored as a serial number of days since 1990-01-01,
/// which is a Monday.
pub const BASE_YEAR: i32 = 1990;

pub const MINUTES_PER_DAY: i32 = 1440;

/// Upper bound on representable years, roughly four millennia past the
/// epoch.  Serials are kept in `i32`; datetimes (`serial * 1440 + minute`)
/// need `i64`.
pub const MAX_YEAR: i32 = 5989;

/// Weekday set with Monday in bit 0, matching the epoch being a Monday
/// (so `serial % 7` indexes directly into the mask).
#[bitmask(u8)]
#[derive(Default)]
pub enum Weekdays {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(BASE_YEAR, 1, 1).unwrap()
}

pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 400 == 0 || year % 100 != 0)
}

pub fn days_in_month(month: u32, year: i32) -> u32 {
    match (month, is_leap_year(year)) {
        (2, true) => 29,
        (2, false) => 28,
        (m, _) if m == 4 || m == 6 || m == 9 || m == 11 => 30,
        _ => 31,
    }
}

pub fn days_in_year(year: i32) -> i64 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Maximum day-of-month irrespective of year (Feb counts 29).
pub fn max_days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Serial for a Gregorian date, `None` if the date is invalid or
/// outside the supported range.
pub fn dse(year: i32, month: u32, day: u32) -> Option<i32> {
    if !(BASE_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.signed_duration_since(epoch()).num_days() as i32)
}

/// Inverse of [`dse`].  Only meaningful for non-negative serials.
pub fn from_dse(serial: i32) -> (i32, u32, u32) {
    use chrono::Datelike;
    let date = epoch() + chrono::Duration::days(serial as i64);
    (date.year(), date.month(), date.day())
}

/// Weekday with 0 = Sunday, as user-visible numbering has it.
pub fn weekday(serial: i32) -> u32 {
    ((serial + 1) % 7) as u32
}

/// Weekday with 0 = Monday, the convention inside weekday masks.
pub fn monday_index(serial: i32) -> u32 {
    (serial % 7) as u32
}

pub fn day_name(serial: i32) -> &'static str {
    DAY_NAMES[monday_index(serial) as usize]
}

pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES[(month - 1) as usize]
}

/// Advance `serial` forward to the first day whose weekday is in `mask`.
pub fn advance_to_weekday(mut serial: i32, mask: Weekdays) -> i32 {
    while mask.bits() & (1 << monday_index(serial)) == 0 {
        serial += 1;
    }
    serial
}

/// First day at or after `serial` matching one of the Monday-based
/// weekday indices.
pub fn find_nearest_weekday(serial: i32, candidates: NonEmpty<u32>) -> i32 {
    let mut mask = Weekdays::none();
    for wd in candidates {
        mask |= Weekdays::from(1u8 << wd);
    }
    advance_to_weekday(serial, mask)
}

/// Case-insensitive month-name lookup, three-letter minimum prefix.
/// Returns the 1-based month number.
pub fn month_from_name(name: &str) -> Option<u32> {
    if name.len() < 3 {
        return None;
    }
    let lower = name.to_ascii_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| m.to_ascii_lowercase().starts_with(&lower))
        .map(|i| i as u32 + 1)
}

/// Case-insensitive weekday-name lookup, three-letter minimum prefix.
/// Returns the Monday-based index.
pub fn weekday_from_name(name: &str) -> Option<u32> {
    if name.len() < 3 {
        return None;
    }
    let lower = name.to_ascii_lowercase();
    DAY_NAMES
        .iter()
        .position(|d| d.to_ascii_lowercase().starts_with(&lower))
        .map(|i| i as u32)
}
