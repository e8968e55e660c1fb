//! IMF-fixdate formatting and parsing for `Last-Modified` and
//! `If-Modified-Since`.

use crate::error::{Error, Result};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const IMF_FIXDATE: &[time::format_description::BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format a timestamp as an IMF-fixdate HTTP date (always GMT).
pub fn format_http_date(t: OffsetDateTime) -> String {
    t.to_offset(UtcOffset::UTC)
        .format(IMF_FIXDATE)
        .unwrap_or_default()
}

/// Parse an IMF-fixdate HTTP date.
pub fn parse_http_date(s: &str) -> Result<OffsetDateTime> {
    PrimitiveDateTime::parse(s, IMF_FIXDATE)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| Error::InvalidDate(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_imf_fixdate() {
        let t = datetime!(2015-10-21 07:28:00 UTC);
        assert_eq!(format_http_date(t), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn round_trips() {
        let t = datetime!(2024-02-29 23:59:59 UTC);
        let s = format_http_date(t);
        assert_eq!(parse_http_date(&s).unwrap(), t);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_http_date("yesterday").is_err());
    }
}
