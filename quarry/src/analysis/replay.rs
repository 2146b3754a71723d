//! Adaptor running tantivy token filters over an already-tokenized stream.
//!
//! The pipeline tokenizes into plain `Vec<Token>`; filters that tantivy
//! already ships (stemming, stop words, ASCII folding) are applied by
//! replaying those tokens through a one-off `TextAnalyzer`.

use tantivy::tokenizer::{TextAnalyzer, Token, TokenFilter, TokenStream, Tokenizer};

#[derive(Clone, Default)]
struct Replay {
    tokens: Vec<Token>,
}

impl Tokenizer for Replay {
    type TokenStream<'a> = ReplayStream;

    fn token_stream<'a>(&'a mut self, _text: &'a str) -> Self::TokenStream<'a> {
        ReplayStream {
            tokens: std::mem::take(&mut self.tokens).into_iter(),
            current: Token::default(),
        }
    }
}

struct ReplayStream {
    tokens: std::vec::IntoIter<Token>,
    current: Token,
}

impl TokenStream for ReplayStream {
    fn advance(&mut self) -> bool {
        match self.tokens.next() {
            Some(token) => {
                self.current = token;
                true
            }
            None => false,
        }
    }

    fn token(&self) -> &Token {
        &self.current
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.current
    }
}

/// Run `filter` over `tokens`, collecting whatever it emits.
pub(crate) fn apply<F: TokenFilter>(filter: F, tokens: Vec<Token>) -> Vec<Token> {
    if tokens.is_empty() {
        return tokens;
    }
    let mut analyzer = TextAnalyzer::builder(Replay { tokens }).filter(filter).build();
    let mut stream = analyzer.token_stream("");
    let mut out = Vec::new();
    let mut collect = |token: &Token| out.push(token.clone());
    stream.process(&mut collect);
    out
}
