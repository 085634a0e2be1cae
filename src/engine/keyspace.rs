use std::collections::HashSet;

use super::EngineError;

/// Symbols candidates are built from, in enumeration order.
pub const DEFAULT_CHARSET: &str = concat!(
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "abcdefghijklmnopqrstuvwxyz",
    "0123456789",
    "@#%^&*()_+-=.,:;?",
);

/// A fixed, ordered, duplicate-free set of symbols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Charset {
    symbols: Vec<char>,
}

impl Charset {
    pub fn new(symbols: &str) -> Result<Self, EngineError> {
        let symbols: Vec<char> = symbols.chars().collect();
        if symbols.is_empty() {
            return Err(EngineError::InvalidConfig("charset is empty".into()));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = symbols.iter().find(|c| !seen.insert(**c)) {
            return Err(EngineError::InvalidConfig(format!(
                "charset repeats {dup:?}"
            )));
        }

        Ok(Self { symbols })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn render(&self, indices: &[usize]) -> String {
        indices.iter().map(|&i| self.symbols[i]).collect()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_CHARSET.chars().collect(),
        }
    }
}

/// Every string over a charset, shortest first and in charset order within a
/// length.
///
/// The position is a mixed-radix counter, most significant index first.
/// Without a length cap the iterator never ends.
pub struct Keyspace<'a> {
    charset: &'a Charset,
    indices: Vec<usize>,
    max_length: Option<usize>,
    done: bool,
}

impl<'a> Keyspace<'a> {
    pub fn new(charset: &'a Charset, max_length: Option<usize>) -> Self {
        Self {
            charset,
            indices: vec![0],
            max_length,
            done: max_length == Some(0),
        }
    }

    fn advance(&mut self) {
        let radix = self.charset.len();

        for digit in self.indices.iter_mut().rev() {
            *digit += 1;
            if *digit < radix {
                return;
            }
            *digit = 0;
        }

        // carried past the first index, every string of this length is spent
        let next_len = self.indices.len() + 1;
        if self.max_length.is_some_and(|max| next_len > max) {
            self.done = true;
        } else {
            self.indices = vec![0; next_len];
        }
    }
}

impl Iterator for Keyspace<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }

        let candidate = self.charset.render(&self.indices);
        self.advance();

        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn default_charset_matches_the_documented_order() {
        let charset = Charset::default();
        assert_eq!(charset.len(), 79);
        assert_eq!(Keyspace::new(&charset, None).next().as_deref(), Some("A"));
        assert_eq!(
            Keyspace::new(&charset, Some(1)).last().as_deref(),
            Some("?")
        );
    }

    #[test]
    fn each_length_is_exhausted_in_order_before_the_next() {
        let alphabet = "xyz";
        let charset = Charset::new(alphabet).unwrap();
        let produced: Vec<String> = Keyspace::new(&charset, Some(4)).collect();

        let expected: Vec<String> = (1..=4)
            .flat_map(|len| {
                (0..len)
                    .map(|_| alphabet.chars())
                    .multi_cartesian_product()
                    .map(|chars| chars.into_iter().collect::<String>())
            })
            .collect();

        assert_eq!(produced, expected);
        assert_eq!(produced.len(), 3 + 9 + 27 + 81);
        assert!(produced.iter().all_unique());
    }

    #[test]
    fn counts_k_to_the_l_per_length() {
        let charset = Charset::new("ab1?").unwrap();
        let counts = Keyspace::new(&charset, Some(5)).counts_by(|c| c.chars().count());

        for len in 1..=5 {
            assert_eq!(counts[&len], 4usize.pow(len as u32));
        }
    }

    #[test]
    fn lengths_never_decrease() {
        let charset = Charset::default();
        let lengths = Keyspace::new(&charset, None)
            .take(79 + 79 * 79 + 10)
            .map(|c| c.chars().count());

        assert!(lengths.tuple_windows().all(|(a, b)| a <= b));
    }

    #[test]
    fn carry_rolls_over_to_a_longer_candidate() {
        let charset = Charset::new("01").unwrap();
        let produced: Vec<String> = Keyspace::new(&charset, None).take(7).collect();

        assert_eq!(produced, ["0", "1", "00", "01", "10", "11", "000"]);
    }

    #[test]
    fn zero_cap_yields_nothing() {
        let charset = Charset::default();
        assert_eq!(Keyspace::new(&charset, Some(0)).count(), 0);
    }

    #[test]
    fn bad_charsets_are_rejected() {
        assert!(Charset::new("").is_err());
        assert!(Charset::new("abca").is_err());
    }
}
