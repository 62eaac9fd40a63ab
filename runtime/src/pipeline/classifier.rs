use crate::storage::DocumentType;

pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> DocumentType;
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub document_type: DocumentType,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(document_type: DocumentType, keywords: &[&str]) -> Self {
        Self {
            document_type,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

/// Case-insensitive substring match over an ordered rule list; the first
/// rule with a hit wins, `UNKNOWN` otherwise.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(DocumentType::Invoice, &["invoice"]),
            KeywordRule::new(DocumentType::Receipt, &["receipt"]),
            KeywordRule::new(DocumentType::Contract, &["agreement", "contract"]),
        ])
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> DocumentType {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| text.contains(kw.as_str())))
            .map(|rule| rule.document_type)
            .unwrap_or(DocumentType::Unknown)
    }
}
