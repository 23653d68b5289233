use std::{borrow::Cow, collections::BTreeMap, fmt};

/// Identifies a cache entry: an operation name plus named parameters.
///
/// Parameters are kept sorted, so two keys built with the same parameters in a
/// different order are equal.
///
/// ```
/// use bookshelf_query::QueryKey;
///
/// let a = QueryKey::new("bookSearch").with("query", "dune").with("page", 1);
/// let b = QueryKey::new("bookSearch").with("page", 1).with("query", "dune");
/// assert_eq!(a, b);
/// assert!(a.starts_with(&QueryKey::new("bookSearch")));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    name: Cow<'static, str>,
    params: BTreeMap<String, String>,
}

impl QueryKey {
    /// Creates a key without parameters.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a parameter.
    pub fn with(mut self, param: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(param.into(), value.to_string());
        self
    }

    /// The operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of a single parameter.
    pub fn param(&self, param: &str) -> Option<&str> {
        self.params.get(param).map(String::as_str)
    }

    /// Whether this key is addressed by `prefix`: same operation name and every
    /// parameter of `prefix` present here with the same value.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.name == prefix.name
            && prefix
                .params
                .iter()
                .all(|(param, value)| self.params.get(param) == Some(value))
    }
}

impl From<&'static str> for QueryKey {
    fn from(name: &'static str) -> Self {
        QueryKey::new(name)
    }
}

impl From<String> for QueryKey {
    fn from(name: String) -> Self {
        QueryKey::new(name)
    }
}

impl From<&QueryKey> for QueryKey {
    fn from(key: &QueryKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}", self.name)?;
        if !self.params.is_empty() {
            f.write_str(",{")?;
            for (i, (param, value)) in self.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{param:?}:{value:?}")?;
            }
            f.write_str("}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        let key = QueryKey::new("book").with("bookId", "42");
        assert_eq!(r#"["book",{"bookId":"42"}]"#, key.to_string());
        assert_eq!(r#"["list-items"]"#, QueryKey::from("list-items").to_string());
    }

    #[test]
    fn prefix_matching() {
        let key = QueryKey::new("bookSearch").with("query", "dune");

        assert!(key.starts_with(&QueryKey::new("bookSearch")));
        assert!(key.starts_with(&key));
        assert!(!key.starts_with(&QueryKey::new("bookSearch").with("query", "emma")));
        assert!(!key.starts_with(&QueryKey::new("book")));
        assert!(!QueryKey::new("bookSearch").starts_with(&key));
    }
}
