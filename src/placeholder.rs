//! Fresh tokens that stand in for newlines and corner quotes while a batch
//! round-trips through the model.

const MAX_ATTEMPTS: usize = 10;

/// Minting gave up: every candidate token collided with the corpus.
#[derive(Debug)]
pub struct PlaceholderExhausted {
    pub base: String,
}

impl std::fmt::Display for PlaceholderExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not mint a `{}` placeholder absent from the file",
            self.base
        )
    }
}

impl std::error::Error for PlaceholderExhausted {}

/// Return `<base-r>` with a random 16-bit `r`, guaranteed not to occur in `corpus`.
pub fn mint(base: &str, corpus: &str) -> Result<String, PlaceholderExhausted> {
    for _ in 0..MAX_ATTEMPTS {
        let token = format!("<{base}-{}>", rand::random::<u16>());
        if !corpus.contains(&token) {
            return Ok(token);
        }
    }
    Err(PlaceholderExhausted {
        base: base.to_string(),
    })
}

/// The token triple for one work file. Never reused across files.
#[derive(Debug, Clone)]
pub struct PlaceholderSet {
    pub newline: String,
    pub quote_open: String,
    pub quote_close: String,
}

impl PlaceholderSet {
    /// Mint all three tokens against the same corpus.
    pub fn mint_for(corpus: &str) -> Result<Self, PlaceholderExhausted> {
        Ok(Self {
            newline: mint("NL", corpus)?,
            quote_open: mint("QS", corpus)?,
            quote_close: mint("QE", corpus)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_is_absent_from_corpus() {
        let corpus = "ある日の暮方の事である。\n下人が羅生門の下で雨やみを待っていた。";
        let token = mint("NL", corpus).unwrap();
        assert!(!corpus.contains(&token));
        assert!(token.starts_with("<NL-"));
        assert!(token.ends_with('>'));
    }

    #[test]
    fn set_mints_three_distinct_bases() {
        let set = PlaceholderSet::mint_for("こんにちは").unwrap();
        assert!(set.newline.starts_with("<NL-"));
        assert!(set.quote_open.starts_with("<QS-"));
        assert!(set.quote_close.starts_with("<QE-"));
    }

    #[test]
    fn minting_against_empty_corpus_succeeds() {
        assert!(mint("QS", "").is_ok());
    }
}
