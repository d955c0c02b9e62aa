//! HMAC-SHA256 request signing (§10.6): Binance signs the urlencoded query
//! string itself, appended as a `signature` parameter.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, query: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_and_hex() {
        let a = sign("secret", "symbol=BTCUSDT&timestamp=1");
        let b = sign("secret", "symbol=BTCUSDT&timestamp=1");
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_queries_sign_differently() {
        let a = sign("secret", "timestamp=1");
        let b = sign("secret", "timestamp=2");
        assert_ne!(a, b);
    }
}
