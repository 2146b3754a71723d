//! Externally supplied word segmenters.
//!
//! Languages without whitespace word boundaries need dictionary-based
//! segmentation. A [`Segmenter`] registered with the resolver becomes a
//! tokenizer that analyzers can reference by name.

/// Splits text into word spans.
pub trait Segmenter: Send + Sync {
    /// Byte ranges `(from, to)` of each word in `text`, in order.
    fn segment(&self, text: &str) -> Vec<(usize, usize)>;
}

impl<F> Segmenter for F
where
    F: Fn(&str) -> Vec<(usize, usize)> + Send + Sync,
{
    fn segment(&self, text: &str) -> Vec<(usize, usize)> {
        self(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Tokenizer;
    use std::sync::Arc;

    /// Greedy longest-match over a fixed vocabulary.
    struct Dictionary(Vec<&'static str>);

    impl Segmenter for Dictionary {
        fn segment(&self, text: &str) -> Vec<(usize, usize)> {
            let mut spans = Vec::new();
            let mut pos = 0;
            while pos < text.len() {
                let rest = &text[pos..];
                let len = self
                    .0
                    .iter()
                    .filter(|w| rest.starts_with(**w))
                    .map(|w| w.len())
                    .max()
                    .unwrap_or_else(|| rest.chars().next().map(char::len_utf8).unwrap_or(1));
                spans.push((pos, pos + len));
                pos += len;
            }
            spans
        }
    }

    #[test]
    fn test_plugin_tokenizer() {
        let tokenizer = Tokenizer::Plugin {
            name: "dict".to_string(),
            segmenter: Arc::new(Dictionary(vec!["我们", "喜欢", "搜索"])),
        };
        let tokens: Vec<_> = tokenizer
            .tokenize("我们喜欢搜索")
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(tokens, vec!["我们", "喜欢", "搜索"]);
    }

    #[test]
    fn test_closure_segmenter() {
        let split = |text: &str| vec![(0, text.len() / 2), (text.len() / 2, text.len())];
        let tokenizer = Tokenizer::Plugin {
            name: "halves".to_string(),
            segmenter: Arc::new(split),
        };
        let tokens = tokenizer.tokenize("abcd");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "cd");
        assert_eq!(tokens[1].position, 1);
    }
}
