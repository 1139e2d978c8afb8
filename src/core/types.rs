// Basic value types shared across the ledger

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Smallest units per coin (8 fractional decimal digits).
pub const COIN: u64 = 100_000_000;

/// Monetary value in smallest units (10^-8 of a coin).
///
/// All arithmetic is integer arithmetic; fractional coin values exist only
/// in serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Invalid(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Construct from smallest units.
    pub fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Construct from whole coins.
    pub fn from_coins(coins: u64) -> Self {
        Self(coins * COIN)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, self.0 % COIN)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parse a decimal string with at most 8 fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || AmountError::Invalid(s.to_string());

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };

        if int_part.is_empty() || frac_part.len() > 8 {
            return Err(bad());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }

        let coins: u64 = int_part.parse().map_err(|_| bad())?;
        let mut frac: u64 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| bad())?
        };
        // "0.5" means 5 tenths, not 5 units
        for _ in frac_part.len()..8 {
            frac *= 10;
        }

        coins
            .checked_mul(COIN)
            .and_then(|c| c.checked_add(frac))
            .map(Amount)
            .ok_or_else(bad)
    }
}

// Serialized as a fixed 8-decimal string so wire values never lose
// precision; numbers are still accepted on input.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal amount with at most 8 fractional digits")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                v.checked_mul(COIN)
                    .map(Amount)
                    .ok_or_else(|| de::Error::custom("amount out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                if v < 0 {
                    return Err(de::Error::custom("amount must not be negative"));
                }
                self.visit_u64(v as u64)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(de::Error::custom("amount must be a finite non-negative number"));
                }
                let units = (v * COIN as f64).round();
                if units > u64::MAX as f64 {
                    return Err(de::Error::custom("amount out of range"));
                }
                Ok(Amount(units as u64))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// A Kaidos address: `KD` + base32(SHA256(public key)[..20]), uppercase
/// RFC 4648 alphabet without padding. Multisig addresses use the `KDM`
/// prefix over the same encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address: {0}")]
    Invalid(String),
}

const BASE32_LEN: usize = 32; // 20 bytes -> 32 base32 characters

impl Address {
    pub const PREFIX: &'static str = "KD";
    pub const MULTISIG_PREFIX: &'static str = "KDM";

    /// Derive an address from key material: prefix + base32(SHA256(material)[..20]).
    pub fn derive(prefix: &str, material: &[u8]) -> Self {
        let digest = Sha256::digest(material);
        let encoded = base32::encode(
            base32::Alphabet::Rfc4648 { padding: false },
            &digest[..20],
        );
        Address(format!("{prefix}{encoded}"))
    }

    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self::derive(Self::PREFIX, public_key)
    }

    pub fn parse(s: &str) -> Result<Self, AddressError> {
        // A standard body may itself start with 'M', so prefixes are
        // disambiguated by total length.
        let body = match s.len() {
            l if l == Self::MULTISIG_PREFIX.len() + BASE32_LEN => {
                s.strip_prefix(Self::MULTISIG_PREFIX)
            }
            l if l == Self::PREFIX.len() + BASE32_LEN => s.strip_prefix(Self::PREFIX),
            _ => None,
        }
        .ok_or_else(|| AddressError::Invalid(s.to_string()))?;

        let alphabet_ok = body
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b));
        if !alphabet_ok {
            return Err(AddressError::Invalid(s.to_string()));
        }
        Ok(Address(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_multisig(&self) -> bool {
        self.0.starts_with(Self::MULTISIG_PREFIX)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> String {
        addr.0
    }
}

/// Reference to a transaction output: `(txid, vout)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Current wall-clock time as fractional unix seconds.
pub fn unix_time_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_parse_and_display() {
        let a: Amount = "50".parse().unwrap();
        assert_eq!(a, Amount::from_coins(50));
        assert_eq!(a.to_string(), "50.00000000");

        let b: Amount = "0.00000001".parse().unwrap();
        assert_eq!(b.units(), 1);

        let c: Amount = "12.5".parse().unwrap();
        assert_eq!(c.units(), 12 * COIN + 50_000_000);
    }

    #[test]
    fn test_amount_parse_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!("-1".parse::<Amount>().is_err());
        assert!("1.123456789".parse::<Amount>().is_err());
        assert!("1.2.3".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn test_amount_json_round_trip() {
        let a = Amount::from_units(2_000_000_001);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"20.00000001\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);

        // numbers are accepted on input
        let from_num: Amount = serde_json::from_str("20.00000001").unwrap();
        assert_eq!(from_num, a);
        let from_int: Amount = serde_json::from_str("20").unwrap();
        assert_eq!(from_int, Amount::from_coins(20));
    }

    #[test]
    fn test_address_derivation() {
        let addr = Address::from_public_key(b"some public key bytes");
        assert!(addr.as_str().starts_with("KD"));
        assert_eq!(addr.as_str().len(), 34);
        assert!(!addr.is_multisig());

        // deterministic
        assert_eq!(addr, Address::from_public_key(b"some public key bytes"));
    }

    #[test]
    fn test_address_parse() {
        let addr = Address::from_public_key(b"key");
        assert_eq!(Address::parse(addr.as_str()).unwrap(), addr);

        assert!(Address::parse("not-an-address").is_err());
        assert!(Address::parse("KDSHORT").is_err());
        // lowercase body is rejected
        let lower = addr.as_str().to_lowercase();
        assert!(Address::parse(&lower).is_err());
    }

    #[test]
    fn test_outpoint_display() {
        let op = OutPoint::new("ab".repeat(32), 3);
        assert!(op.to_string().ends_with(":3"));
    }
}
