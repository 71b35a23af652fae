//! Utility functions

/// Units used by [`format_bytes`], smallest first
pub const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

/// Width of the zero-padded position in staged slice file names
pub const SLICE_INDEX_WIDTH: usize = 8;

/// Extension of staged slice images
pub const SLICE_EXTENSION: &str = "tiff";

/// Format byte size in human-readable form.
///
/// Picks the largest unit that keeps the value below 1024 (never beyond PB)
/// and prints at most two fractional digits with trailing zeros and a
/// trailing point removed: `1536` → `"1.5 KB"`, `0` → `"0 B"`.
pub fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    let value = format!("{:.2}", size);
    let value = value.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", value, SIZE_UNITS[unit_idx])
}

/// Exact integer cube root, `None` when `value` is not a perfect cube
pub fn exact_cube_root(value: u64) -> Option<u64> {
    let estimate = (value as f64).cbrt();
    if !estimate.is_finite() {
        return None;
    }

    // f64 rounding can land one off for large inputs
    let guess = estimate.round() as u64;
    [guess.saturating_sub(1), guess, guess.saturating_add(1)]
        .into_iter()
        .find(|candidate| candidate.checked_pow(3) == Some(value))
}

/// Calculate checksum (CRC32) for data
pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut crc = 0xFFFFFFFFu32;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}

/// Relative path of a stored brick
pub fn brick_path(timepoint: u32, level: usize, index: u64) -> String {
    format!("bricks/t{}/lod{}/{:08}.brick", timepoint, level, index)
}

/// File name of the staged slice at `position`.
///
/// Fixed-width padding keeps lexical order equal to numeric order.
pub fn slice_file_name(position: u64) -> String {
    format!(
        "{:0width$}_slice.{}",
        position,
        SLICE_EXTENSION,
        width = SLICE_INDEX_WIDTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(262144), "256 KB");
        assert_eq!(format_bytes(2097152), "2 MB");
        assert_eq!(format_bytes(16777216), "16 MB");
        assert_eq!(format_bytes(1073741824), "1 GB");
        assert_eq!(format_bytes(1288490189), "1.2 GB");
    }

    #[test]
    fn test_format_bytes_caps_at_petabytes() {
        assert_eq!(format_bytes(1 << 50), "1 PB");
        assert_eq!(format_bytes(1 << 60), "1024 PB");
    }

    #[test]
    fn test_exact_cube_root() {
        assert_eq!(exact_cube_root(0), Some(0));
        assert_eq!(exact_cube_root(1), Some(1));
        assert_eq!(exact_cube_root(8), Some(2));
        assert_eq!(exact_cube_root(512), Some(8));
        assert_eq!(exact_cube_root(1_000_000_000_000), Some(10_000));
        assert_eq!(exact_cube_root(9), None);
        assert_eq!(exact_cube_root(63), None);
    }

    #[test]
    fn test_checksum() {
        assert_eq!(calculate_checksum(b"123456789"), 0xCBF43926);
        assert_ne!(calculate_checksum(b"abc"), calculate_checksum(b"abd"));
    }

    #[test]
    fn test_brick_path() {
        assert_eq!(brick_path(0, 0, 0), "bricks/t0/lod0/00000000.brick");
        assert_eq!(brick_path(1, 2, 42), "bricks/t1/lod2/00000042.brick");
    }

    #[test]
    fn test_slice_file_names_sort_numerically() {
        assert_eq!(slice_file_name(0), "00000000_slice.tiff");
        assert_eq!(slice_file_name(1234), "00001234_slice.tiff");

        let mut names: Vec<String> = [100, 9, 10, 2].iter().map(|&p| slice_file_name(p)).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                slice_file_name(2),
                slice_file_name(9),
                slice_file_name(10),
                slice_file_name(100)
            ]
        );
    }
}
