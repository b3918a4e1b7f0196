//! case insensitive header map preserving the casing headers were written
//! with.

use std::fmt;

/// A mapping from header name to header value.
///
/// Lookup, containment and removal are ASCII case insensitive, while
/// iteration yields each name with the casing it was last written with, in
/// insertion order. Overwriting an entry keeps its position.
///
/// ```rust
/// use lamprey_client::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("Accept", "application/json");
/// assert_eq!(headers.get("aCCEPT"), Some("application/json"));
/// assert_eq!(headers.iter().next(), Some(("Accept", "application/json")));
/// ```
///
/// Multiple header lines with the same name are not supported; inserting an
/// existing name replaces its value.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Insert a header, replacing (in place) an entry whose name only differs
    /// in casing.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Iterate entries in insertion order with their last written casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Equality is name case insensitive and value exact, regardless of insertion
/// order. Behavior is unspecified when one side holds two names with equal
/// lowercase form (the map itself never produces such a state).
impl PartialEq for HeaderMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(n, v)| other.get(n) == Some(v))
    }
}

impl Eq for HeaderMap {}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderMap
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<N, V> Extend<(N, V)> for HeaderMap
where
    N: Into<String>,
    V: Into<String>,
{
    fn extend<T: IntoIterator<Item = (N, V)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a str);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, String)>,
        fn(&'a (String, String)) -> (&'a str, &'a str),
    >;

    fn into_iter(self) -> Self::IntoIter {
        let pair: fn(&'a (String, String)) -> (&'a str, &'a str) =
            |(n, v)| (n.as_str(), v.as_str());
        self.entries.iter().map(pair)
    }
}
