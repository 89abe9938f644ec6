//! Cell reference decoding ("B7" -> column 1).

/// Largest column index a worksheet can address (column "XFD").
pub const MAX_COLUMN_INDEX: usize = 16_383;

/// Decode the column letters of a cell reference into a 0-based index.
///
/// Letters are read as a base-26 number with 'A' = 1 and the result is
/// shifted to 0-based, so "A1" is 0, "Z1" is 25 and "AA1" is 26. Decoding
/// stops at the first non-letter. Lowercase letters are accepted.
///
/// Returns `None` when the reference has no leading letters or addresses a
/// column past [`MAX_COLUMN_INDEX`].
pub fn column_index(reference: &str) -> Option<usize> {
    let mut column = 0usize;
    let mut letters = 0;

    for ch in reference.chars() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        column = column.checked_mul(26)?.checked_add(digit)?;
        letters += 1;
    }

    if letters == 0 {
        return None;
    }

    let index = column - 1;
    (index <= MAX_COLUMN_INDEX).then_some(index)
}

/// Encode a 0-based column index as spreadsheet letters (0 -> "A").
pub fn column_letters(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}
