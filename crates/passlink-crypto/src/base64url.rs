use base64ct::{Base64UrlUnpadded, Encoding};

/// Base64url encode bytes without padding.
pub fn base64url_encode(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(data)
}

/// Base64url decode a string to bytes. Padding and the standard alphabet
/// are rejected.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64UrlUnpadded::decode_vec(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let coordinate = [0xfbu8; 32];
        let encoded = base64url_encode(&coordinate);
        assert_eq!(encoded.len(), 43);
        assert_eq!(base64url_decode(&encoded).unwrap(), coordinate);
    }

    #[test]
    fn url_safe_chars() {
        // Bytes that would produce + and / in standard base64
        let encoded = base64url_encode(&[0xfb, 0xff, 0xfe]);
        assert_eq!(encoded, "-__-");
    }

    #[test]
    fn padding_rejected() {
        assert!(base64url_decode("AAAA").is_ok());
        assert!(base64url_decode("AA==").is_err());
        assert!(base64url_decode("AAAA=").is_err());
    }

    #[test]
    fn standard_alphabet_rejected() {
        assert!(base64url_decode("-__-").is_ok());
        assert!(base64url_decode("+//+").is_err());
    }

    #[test]
    fn empty_input() {
        assert_eq!(base64url_encode(b""), "");
        assert_eq!(base64url_decode("").unwrap(), Vec::<u8>::new());
    }
}
