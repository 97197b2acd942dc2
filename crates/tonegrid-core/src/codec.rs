//! Bit-packed, URL-safe grid tokens
//!
//! The grid is flattened row-major (bit `row * width + column`), packed eight
//! cells per byte with the lowest index in the most significant bit, then
//! base64-encoded and percent-encoded for use as the `d` query parameter.
//! An all-off grid encodes to the empty string.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::DecodeError;
use crate::grid::Grid;

/// Query parameter carrying the grid token
pub const TOKEN_PARAM: &str = "d";
/// Query parameter carrying the token format version
pub const VERSION_PARAM: &str = "v";
pub const TOKEN_VERSION: &str = "1";

/// Characters left unescaped by JavaScript's `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Bytes needed to hold `cells` bits
pub fn packed_len(cells: usize) -> usize {
    cells.div_ceil(8)
}

/// Pack cells MSB-first. A trailing partial byte is zero-padded in its low bits.
pub fn pack_bits(cells: &[bool]) -> Vec<u8> {
    cells
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .filter(|(_, on)| **on)
                .fold(0u8, |byte, (bit, _)| byte | (0x80 >> bit))
        })
        .collect()
}

/// Expand bytes MSB-first into `out`, ignoring any bits past its end
pub fn unpack_bits(bytes: &[u8], out: &mut [bool]) {
    for (i, cell) in out.iter_mut().enumerate() {
        *cell = bytes
            .get(i / 8)
            .map(|byte| byte & (0x80 >> (i % 8)) != 0)
            .unwrap_or(false);
    }
}

/// Encode a grid to a token. Empty grids yield `""`.
pub fn encode(grid: &Grid) -> String {
    if grid.is_empty() {
        return String::new();
    }
    let base64 = STANDARD.encode(pack_bits(grid.as_slice()));
    utf8_percent_encode(&base64, URI_COMPONENT).to_string()
}

/// Decode a token into a fresh grid shaped like `shape`.
///
/// The empty token decodes to an all-off grid. `shape` itself is never
/// touched, so a malformed token leaves the caller's grid as it was.
pub fn decode(token: &str, shape: &Grid) -> Result<Grid, DecodeError> {
    let mut grid = shape.blank();
    if token.is_empty() {
        return Ok(grid);
    }

    let base64 = percent_decode_str(token).decode_utf8()?;
    let bytes = STANDARD.decode(base64.trim())?;

    let expected = packed_len(grid.len());
    if bytes.len() != expected {
        return Err(DecodeError::Length {
            expected,
            actual: bytes.len(),
        });
    }

    unpack_bits(&bytes, grid.as_mut_slice());
    Ok(grid)
}

/// Build a sharing URL. An empty token shares the bare base URL.
pub fn share_url(base: &str, token: &str) -> String {
    if token.is_empty() {
        return base.to_string();
    }
    format!("{base}?{VERSION_PARAM}={TOKEN_VERSION}&{TOKEN_PARAM}={token}")
}

/// Pull the grid token out of a query string (leading `?` optional).
/// Returns None when the parameter is absent.
pub fn token_from_query(query: &str) -> Option<&str> {
    let query = query.strip_prefix('?').unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_PARAM)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: usize, height: usize) -> Grid {
        Grid::new(width, height).unwrap()
    }

    fn grid_with(width: usize, height: usize, cells: &[(usize, usize)]) -> Grid {
        let mut grid = Grid::new(width, height).unwrap();
        for &(column, row) in cells {
            grid.set(column, row, true);
        }
        grid
    }

    #[test]
    fn test_empty_grid_is_empty_token() {
        let grid = Grid::new(16, 16).unwrap();
        assert_eq!(encode(&grid), "");
        assert_eq!(decode("", &blank(16, 16)).unwrap(), grid);
    }

    #[test]
    fn test_single_corner_cell() {
        let grid = grid_with(16, 16, &[(0, 0)]);
        let token = encode(&grid);
        assert!(!token.is_empty());
        // 0x80 then 31 zero bytes, '=' padding escaped
        assert!(token.starts_with("gAAA"));
        assert!(token.ends_with("%3D"));

        let decoded = decode(&token, &blank(16, 16)).unwrap();
        assert!(decoded.get(0, 0));
        assert_eq!(decoded.active_cells().count(), 1);
    }

    #[test]
    fn test_row_major_bit_order() {
        // (1, 0) is bit 1, (0, 1) is bit 16 -> byte 2, MSB
        let grid = grid_with(16, 16, &[(1, 0), (0, 1)]);
        let bytes = pack_bits(grid.as_slice());
        assert_eq!(bytes[0], 0b0100_0000);
        assert_eq!(bytes[2], 0b1000_0000);
    }

    #[test]
    fn test_round_trip_irregular_grid() {
        // 5x3 = 15 bits -> 2 bytes with one padding bit
        let grid = grid_with(5, 3, &[(0, 0), (4, 0), (2, 1), (4, 2)]);
        let bytes = pack_bits(grid.as_slice());
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[1] & 0x01, 0);
        assert_eq!(decode(&encode(&grid), &blank(5, 3)).unwrap(), grid);
    }

    #[test]
    fn test_round_trip_dense_pattern() {
        let cells: Vec<(usize, usize)> = (0..16)
            .flat_map(|c| (0..16).map(move |r| (c, r)))
            .filter(|(c, r)| (c * 7 + r * 3) % 5 < 2)
            .collect();
        let grid = grid_with(16, 16, &cells);
        assert_eq!(decode(&encode(&grid), &blank(16, 16)).unwrap(), grid);
    }

    #[test]
    fn test_token_is_url_safe() {
        let cells: Vec<(usize, usize)> = (0..16).map(|i| (i, 15 - i)).collect();
        let token = encode(&grid_with(16, 16, &cells));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(decode("%%%", &blank(16, 16)), Err(DecodeError::Base64(_))));
        assert!(matches!(decode("%FF%FE", &blank(16, 16)), Err(DecodeError::Percent(_))));
        assert!(matches!(decode("not base64!", &blank(16, 16)), Err(DecodeError::Base64(_))));
        // Valid base64, but only 3 bytes
        assert_eq!(
            decode("gAAA", &blank(16, 16)),
            Err(DecodeError::Length { expected: 32, actual: 3 })
        );
    }

    #[test]
    fn test_truncated_token_rejected() {
        let token = encode(&grid_with(16, 16, &[(3, 3)]));
        let truncated = &token[..token.len() / 2];
        assert!(decode(truncated, &blank(16, 16)).is_err());
    }

    #[test]
    fn test_share_url_and_query() {
        assert_eq!(share_url("https://x.test/", ""), "https://x.test/");
        let url = share_url("https://x.test/", "gA%3D%3D");
        assert_eq!(url, "https://x.test/?v=1&d=gA%3D%3D");

        let (_, query) = url.split_once('?').unwrap();
        assert_eq!(token_from_query(query), Some("gA%3D%3D"));
        assert_eq!(token_from_query("?d=abc"), Some("abc"));
        assert_eq!(token_from_query("v=1"), None);
    }
}
