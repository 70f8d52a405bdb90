/// Kind of thing a global result points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchableSource {
    /// A plugin's own entry ("open Calculator")
    Plugin,
    IndexedItem,
    /// History entry with no backing index item (web searches, removed items)
    History,
}

/// One entry of the global search space
#[derive(Debug, Clone)]
pub struct Searchable {
    /// Item id, or the plugin id for plugin entries
    pub id: String,
    /// Text the query is matched against. For learned terms this is the term.
    pub name: String,
    pub keywords: Vec<String>,
    pub source: SearchableSource,
    /// Owner, used for diversity decay and lookup
    pub plugin_id: String,
    /// Entry derived from a search term previously used to find this item
    pub is_history_term: bool,
    pub count: f64,
    pub last_used: u64,
}

impl Searchable {
    #[must_use]
    pub fn new(source: SearchableSource, plugin_id: &str, id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            keywords: Vec::new(),
            source,
            plugin_id: plugin_id.to_string(),
            is_history_term: false,
            count: 0.0,
            last_used: 0,
        }
    }

    #[must_use]
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, count: f64, last_used: u64) -> Self {
        self.count = count;
        self.last_used = last_used;
        self
    }

    /// A learned-term twin of this entry matching on `term`
    #[must_use]
    pub fn history_term(&self, term: &str) -> Self {
        Self {
            name: term.to_string(),
            keywords: Vec::new(),
            is_history_term: true,
            ..self.clone()
        }
    }

    /// Identity used to merge duplicate matches
    #[must_use]
    pub fn key(&self) -> (SearchableSource, &str, &str) {
        (self.source, self.plugin_id.as_str(), self.id.as_str())
    }
}

/// A fuzzy match against a searchable
#[derive(Debug, Clone)]
pub struct SearchMatch<'a> {
    pub searchable: &'a Searchable,
    pub score: f64,
}
