#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    // Syntax we do not serve; the caller answers with the whole file.
    Invalid,
    // Well formed but outside the file; answered with 416.
    Unsatisfiable,
}

pub fn parse_range_header(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Invalid)?
        .trim();
    if spec.contains(',') {
        return Err(RangeError::Invalid);
    }
    let (first, last) = spec.split_once('-').ok_or(RangeError::Invalid)?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix form: the final `last` bytes.
        let count = parse_offset(last)?;
        if count == 0 || size == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: size.saturating_sub(count),
            end: size - 1,
        });
    }

    let start = parse_offset(first)?;
    let end = match last {
        "" => None,
        text => Some(parse_offset(text)?),
    };
    if matches!(end, Some(end) if end < start) {
        return Err(RangeError::Invalid);
    }
    if start >= size {
        return Err(RangeError::Unsatisfiable);
    }
    let end = end.map_or(size - 1, |end| end.min(size - 1));
    Ok(ByteRange { start, end })
}

fn parse_offset(text: &str) -> Result<u64, RangeError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Invalid);
    }
    text.parse().map_err(|_| RangeError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::{parse_range_header, ByteRange, RangeError};

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn open_and_closed_ranges() {
        assert_eq!(parse_range_header("bytes=0-", 100), Ok(range(0, 99)));
        assert_eq!(parse_range_header("bytes=10-19", 100), Ok(range(10, 19)));
        assert_eq!(parse_range_header("bytes=90-500", 100), Ok(range(90, 99)));
        assert_eq!(parse_range_header("bytes=10-19", 100).unwrap().len(), 10);
    }

    #[test]
    fn suffix_ranges() {
        assert_eq!(parse_range_header("bytes=-10", 100), Ok(range(90, 99)));
        assert_eq!(parse_range_header("bytes=-500", 100), Ok(range(0, 99)));
        assert_eq!(
            parse_range_header("bytes=-0", 100),
            Err(RangeError::Unsatisfiable)
        );
    }

    #[test]
    fn malformed_headers_are_ignored() {
        for header in ["items=0-1", "bytes=0-1,4-5", "bytes=9-3", "bytes=a-b", "bytes=-", "bytes=+1-2"] {
            assert_eq!(parse_range_header(header, 100), Err(RangeError::Invalid), "{}", header);
        }
    }

    #[test]
    fn ranges_past_the_end() {
        assert_eq!(
            parse_range_header("bytes=100-", 100),
            Err(RangeError::Unsatisfiable)
        );
        assert_eq!(
            parse_range_header("bytes=0-", 0),
            Err(RangeError::Unsatisfiable)
        );
    }

    #[test]
    fn formats_content_range() {
        assert_eq!(range(5, 9).content_range(20), "bytes 5-9/20");
    }
}
