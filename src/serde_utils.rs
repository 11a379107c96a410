//! Shared serialization utilities.

use alloy::{
    primitives::{Address, U256},
    sol_types::{eip712_domain, Eip712Domain},
};
use serde::{Deserialize, Deserializer, Serializer};

/// Create the EIP-712 domain a Safe (>= 1.3.0) signs `SafeTx` under.
pub fn safe_domain(chain_id: u64, safe: Address) -> Eip712Domain {
    eip712_domain! {
        chain_id: chain_id,
        verifying_contract: safe,
    }
}

/// Format a U256 as a JSON-RPC hex quantity (no leading zeros).
pub fn hex_quantity(val: U256) -> String {
    format!("0x{val:x}")
}

/// `U256` as a decimal string, the form the batch file and the Safe service use.
///
/// Deserialization also accepts `0x`-prefixed hex and bare JSON numbers.
pub mod decimal_u256 {
    use super::*;

    pub fn serialize<S>(val: &U256, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&val.to_string())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(U256::from(n)),
            Raw::Str(s) => {
                let s = s.trim();
                let parsed = match s.strip_prefix("0x") {
                    Some(hex) => U256::from_str_radix(hex, 16),
                    None => U256::from_str_radix(s, 10),
                };
                parsed.map_err(|e| serde::de::Error::custom(format!("invalid value {s:?}: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Holder {
        #[serde(with = "decimal_u256")]
        value: U256,
    }

    #[test]
    fn test_decimal_u256_accepts_all_forms() {
        for raw in [r#"{"value":"1000"}"#, r#"{"value":"0x3e8"}"#, r#"{"value":1000}"#] {
            let holder: Holder = serde_json::from_str(raw).unwrap();
            assert_eq!(holder.value, U256::from(1000u64));
        }
    }

    #[test]
    fn test_decimal_u256_serializes_decimal() {
        let json = serde_json::to_string(&Holder {
            value: U256::from(255u64),
        })
        .unwrap();
        assert_eq!(json, r#"{"value":"255"}"#);
    }

    #[test]
    fn test_hex_quantity_has_no_padding() {
        assert_eq!(hex_quantity(U256::ZERO), "0x0");
        assert_eq!(hex_quantity(U256::from(4096u64)), "0x1000");
    }
}
