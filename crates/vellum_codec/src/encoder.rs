//! Fixed-width little-endian encoder.

/// An append-only binary encoder.
///
/// All multi-byte integers are written little-endian. Optional values
/// are written as an explicit one-byte presence flag (0 or 1) followed
/// by the value when present; absence contributes exactly one byte.
/// Variable-length byte strings are written as a 4-byte length prefix
/// followed by the raw bytes.
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an `i64`.
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a bool as a single 0/1 byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Write raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a length-prefixed byte string (4-byte LE length + data).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= u32::MAX as usize);
        self.write_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    /// Write an optional `u64`: 1-byte flag + value when present.
    pub fn write_option_u64(&mut self, value: Option<u64>) {
        match value {
            Some(v) => {
                self.buffer.push(1);
                self.write_u64(v);
            }
            None => self.buffer.push(0),
        }
    }

    /// Write an optional byte string: 1-byte flag + length-prefixed data.
    pub fn write_option_bytes(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(b) => {
                self.buffer.push(1);
                self.write_bytes(b);
            }
            None => self.buffer.push(0),
        }
    }

    /// Write an optional UTF-8 string: 1-byte flag + length-prefixed data.
    pub fn write_option_str(&mut self, text: Option<&str>) {
        self.write_option_bytes(text.map(str::as_bytes));
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut enc = Encoder::new();
        enc.write_u16(0x0201);
        enc.write_u32(0x0605_0403);
        enc.write_u64(0x0e0d_0c0b_0a09_0807);
        assert_eq!(
            enc.into_bytes(),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e]
        );
    }

    #[test]
    fn signed_integers_round_through_two_complement() {
        let mut enc = Encoder::new();
        enc.write_i64(-1);
        assert_eq!(enc.into_bytes(), vec![0xff; 8]);
    }

    #[test]
    fn bytes_carry_length_prefix() {
        let mut enc = Encoder::new();
        enc.write_bytes(&[0xaa, 0xbb, 0xcc]);
        assert_eq!(enc.into_bytes(), vec![3, 0, 0, 0, 0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn empty_bytes_are_just_a_prefix() {
        let mut enc = Encoder::new();
        enc.write_bytes(&[]);
        assert_eq!(enc.into_bytes(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn absent_option_is_one_byte() {
        let mut enc = Encoder::new();
        enc.write_option_u64(None);
        assert_eq!(enc.into_bytes(), vec![0]);

        let mut enc = Encoder::new();
        enc.write_option_u64(Some(7));
        assert_eq!(enc.into_bytes(), vec![1, 7, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn option_bytes_flag_then_prefix() {
        let mut enc = Encoder::new();
        enc.write_option_bytes(Some(&[9]));
        assert_eq!(enc.into_bytes(), vec![1, 1, 0, 0, 0, 9]);

        let mut enc = Encoder::new();
        enc.write_option_bytes(None);
        assert_eq!(enc.into_bytes(), vec![0]);
    }

    #[test]
    fn strings_encode_as_utf8_bytes() {
        let mut enc = Encoder::new();
        enc.write_str("abc");
        assert_eq!(enc.into_bytes(), vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }
}
