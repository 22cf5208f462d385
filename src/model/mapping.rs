use serde::de::Error as SerdeError;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

/// Header names we recognize in an export or ledger, in the order they are preferred when more
/// than one alias is present.
pub(crate) const DATE_HEADERS: &[&str] = &["Date"];
pub(crate) const AMOUNT_HEADERS: &[&str] = &["Amount"];
pub(crate) const DESCRIPTION_HEADERS: &[&str] = &["Description", "Name"];
pub(crate) const ID_HEADERS: &[&str] = &["Id", "Transaction ID"];

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MappingError(String);

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl StdError for MappingError {}

/// The ordered list of column headers from an export or ledger header row, with index lookup.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct Mapping {
    headers: Vec<String>,
    header_map: HashMap<String, usize>,
}

impl Mapping {
    /// Create a new `Mapping` from a list of header strings. Duplicate headers are rejected
    /// because positional lookup would be ambiguous.
    pub fn new<S, I>(headers: I) -> Result<Self, MappingError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let headers: Vec<String> = headers.into_iter().map(|s| s.into()).collect();
        if headers.is_empty() {
            return Err(MappingError(String::from(
                "A header row must have at least one column",
            )));
        }

        let header_map: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.to_owned(), idx))
            .collect();

        if header_map.len() != headers.len() {
            return Err(MappingError(String::from("Encountered a duplicate header")));
        }

        Ok(Self {
            headers,
            header_map,
        })
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn index_of(&self, header: impl AsRef<str>) -> Option<usize> {
        self.header_map.get(header.as_ref()).copied()
    }

    /// Find the index of the first matching alias from `aliases`.
    fn index_of_any(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|h| self.index_of(h))
    }

    pub fn date_index(&self) -> Option<usize> {
        self.index_of_any(DATE_HEADERS)
    }

    pub fn amount_index(&self) -> Option<usize> {
        self.index_of_any(AMOUNT_HEADERS)
    }

    pub fn description_index(&self) -> Option<usize> {
        self.index_of_any(DESCRIPTION_HEADERS)
    }

    pub fn id_index(&self) -> Option<usize> {
        self.index_of_any(ID_HEADERS)
    }
}

impl Serialize for Mapping {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.headers.len()))?;
        for header in &self.headers {
            seq.serialize_element(header)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items: Vec<String> = Vec::deserialize(deserializer)?;
        let mapping = Mapping::new(items).map_err(D::Error::custom)?;
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_lookup() {
        let mapping = Mapping::new(vec!["Date", "Amount", "Description", "Id"]).unwrap();
        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping.index_of("Amount"), Some(1));
        assert_eq!(mapping.index_of("Category"), None);
        assert_eq!(mapping.date_index(), Some(0));
        assert_eq!(mapping.amount_index(), Some(1));
        assert_eq!(mapping.description_index(), Some(2));
        assert_eq!(mapping.id_index(), Some(3));
    }

    #[test]
    fn test_mapping_description_alias() {
        let mapping =
            Mapping::new(vec!["Date", "Account", "Name", "Amount", "PlaidName", "Id"]).unwrap();
        assert_eq!(mapping.description_index(), Some(2));
        assert_eq!(mapping.id_index(), Some(5));
    }

    #[test]
    fn test_mapping_transaction_id_alias() {
        let mapping = Mapping::new(vec!["Transaction ID", "Date", "Amount"]).unwrap();
        assert_eq!(mapping.id_index(), Some(0));
    }

    #[test]
    fn test_mapping_duplicate_header() {
        assert!(Mapping::new(vec!["Date", "Date"]).is_err());
    }

    #[test]
    fn test_mapping_empty() {
        assert!(Mapping::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_mapping_serde() {
        let original_json = r##"["Date","Amount","Description"]"##;
        let mapping: Mapping = serde_json::from_str(original_json).unwrap();
        let serialized = serde_json::to_string(&mapping).unwrap();
        assert_eq!(original_json, serialized);
    }
}
