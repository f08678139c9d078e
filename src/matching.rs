use crate::signatures::SignatureRecord;

/// True when `record`'s header pattern matches the start of `window`.
///
/// A window shorter than the pattern (a header cut off by end of stream)
/// is a non-match, never an error.
#[inline]
pub fn match_header(window: &[u8], record: &SignatureRecord) -> bool {
    record.header().matches(window)
}

/// True when `record` has a footer and it matches the start of `window`.
#[inline]
pub fn match_footer(window: &[u8], record: &SignatureRecord) -> bool {
    record.footer().is_some_and(|footer| footer.matches(window))
}
