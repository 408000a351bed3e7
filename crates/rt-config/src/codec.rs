// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts a value to and from its textual form.
///
/// Blanket-implemented over any `Serialize + DeserializeOwned` type using
/// `serde_yaml` as the interchange format: scalars round-trip through their
/// natural YAML scalar representation (so `42` stays `"42"`, not `"'42'"`),
/// and containers (`Vec<T>`, `BTreeMap<String, T>`, ...) get their element
/// coercion "for free" by recursing through serde, matching the reference
/// registry's recursive `LexicalCast` specializations.
pub trait TextCodec: Sized {
    fn to_text(&self) -> String;
    fn from_text(text: &str) -> Result<Self, String>;
    fn type_name() -> &'static str;
}

impl<T> TextCodec for T
where
    T: Serialize + DeserializeOwned,
{
    fn to_text(&self) -> String {
        // A bare scalar serializes without a trailing document marker; other
        // shapes may carry one, which is fine since `from_text` accepts it.
        serde_yaml::to_string(self)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    }

    fn from_text(text: &str) -> Result<Self, String> {
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }

    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn scalar_round_trip() {
        let text = 42u32.to_text();
        assert_eq!(u32::from_text(&text).unwrap(), 42);
    }

    #[test]
    fn vec_round_trip() {
        let v = vec![3, 4, 5];
        let text = v.to_text();
        assert_eq!(Vec::<i32>::from_text(&text).unwrap(), v);
    }

    #[test]
    fn map_round_trip() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), 1);
        m.insert("b".to_string(), 2);
        let text = m.to_text();
        assert_eq!(BTreeMap::<String, i32>::from_text(&text).unwrap(), m);
    }
}
