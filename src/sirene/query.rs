//! Request shapes sent to the Sirene API
//!
//! Identifiers are validated here, before any network call is made.

use std::fmt;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::ValidationError;

const SIRET_LENGTH: usize = 14;

/// A normalized 14-digit establishment identifier.
///
/// Whitespace is stripped on parse, so `"123 456 789 00012"` and
/// `"12345678900012"` are the same SIRET.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Siret(String);

impl Siret {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let length = normalized.chars().count();

        if length != SIRET_LENGTH || !normalized.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidSiret {
                value: raw.to_string(),
                length,
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First nine digits: the SIREN of the owning legal unit.
    pub fn siren(&self) -> &str {
        &self.0[..9]
    }
}

impl fmt::Display for Siret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic filter for searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Department {
    /// Administrative department code ("38", "2A"); matches every postal code
    /// starting with it.
    Code(String),
    /// Full postal code ("38100").
    PostalCode(String),
}

impl Department {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value = raw.trim();
        match value.len() {
            2 if value.bytes().all(|b| b.is_ascii_alphanumeric()) => {
                Ok(Self::Code(value.to_ascii_uppercase()))
            }
            5 if value.bytes().all(|b| b.is_ascii_digit()) => Ok(Self::PostalCode(value.to_string())),
            _ => Err(ValidationError::InvalidDepartment(raw.to_string())),
        }
    }

    fn lucene_clause(&self) -> String {
        match self {
            Department::Code(code) => format!("codePostalEtablissement:{}*", code),
            Department::PostalCode(postal) => format!("codePostalEtablissement:{}", postal),
        }
    }
}

/// Free-text establishment search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub clue: String,
    pub department: Option<Department>,
}

impl SearchQuery {
    /// Build a search from raw query parameters. `clue` is required and must
    /// not be blank; `department` is optional.
    pub fn from_params(
        clue: Option<&str>,
        department: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let clue = clue
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ValidationError::MissingParameter("clue"))?;

        let department = department
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(Department::parse)
            .transpose()?;

        Ok(Self {
            clue: clue.to_string(),
            department,
        })
    }

    /// The clue itself, when it is a SIRET rather than a name.
    pub fn siret(&self) -> Option<Siret> {
        Siret::parse(&self.clue).ok()
    }

    /// Lucene-style `q` parameter understood by the `/siret` search endpoint.
    ///
    /// A clue that parses as a SIRET searches that identifier and ignores the
    /// department. Name clues are matched without diacritics.
    ///
    /// ```
    /// use sirene_gateway::sirene::SearchQuery;
    ///
    /// let query = SearchQuery::from_params(Some("test"), Some("38")).unwrap();
    /// assert_eq!(
    ///     query.to_lucene(),
    ///     r#"denominationUniteLegale:"test" AND codePostalEtablissement:38*"#
    /// );
    /// ```
    pub fn to_lucene(&self) -> String {
        if let Some(siret) = self.siret() {
            return format!("siret:{}", siret);
        }

        let clue = strip_diacritics(&self.clue);
        let name = format!("denominationUniteLegale:\"{}\"", escape_phrase(&clue));
        match &self.department {
            Some(department) => format!("{} AND {}", name, department.lucene_clause()),
            None => name,
        }
    }
}

/// "le bar à pain" -> "le bar a pain"
fn strip_diacritics(value: &str) -> String {
    value.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn escape_phrase(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siret_strips_spaces() {
        let siret = Siret::parse("123 456 789 00012").unwrap();
        assert_eq!(siret.as_str(), "12345678900012");
        assert_eq!(siret.siren(), "123456789");
    }

    #[test]
    fn test_siret_rejects_wrong_length() {
        let err = Siret::parse("1234").unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidSiret {
                value: "1234".to_string(),
                length: 4
            }
        );
        assert!(Siret::parse("123456789000123").is_err());
        assert!(Siret::parse("").is_err());
    }

    #[test]
    fn test_siret_rejects_non_digits() {
        assert!(Siret::parse("1234567890001A").is_err());
        assert!(Siret::parse("../../../token").is_err());
    }

    #[test]
    fn test_department_forms() {
        assert_eq!(
            Department::parse("38").unwrap(),
            Department::Code("38".to_string())
        );
        assert_eq!(
            Department::parse("2a").unwrap(),
            Department::Code("2A".to_string())
        );
        assert_eq!(
            Department::parse("38100").unwrap(),
            Department::PostalCode("38100".to_string())
        );
        assert!(Department::parse("381").is_err());
        assert!(Department::parse("3810A").is_err());
    }

    #[test]
    fn test_lucene_query_with_department_code() {
        let query = SearchQuery::from_params(Some("test"), Some("38")).unwrap();
        assert_eq!(
            query.to_lucene(),
            r#"denominationUniteLegale:"test" AND codePostalEtablissement:38*"#
        );
    }

    #[test]
    fn test_lucene_query_with_postal_code() {
        let query = SearchQuery::from_params(Some("code en stock"), Some("13001")).unwrap();
        assert_eq!(
            query.to_lucene(),
            r#"denominationUniteLegale:"code en stock" AND codePostalEtablissement:13001"#
        );
    }

    #[test]
    fn test_lucene_query_without_department() {
        let query = SearchQuery::from_params(Some("  acme "), Some("")).unwrap();
        assert_eq!(query.department, None);
        assert_eq!(query.to_lucene(), r#"denominationUniteLegale:"acme""#);
    }

    #[test]
    fn test_lucene_query_escapes_quotes() {
        let query = SearchQuery::from_params(Some(r#"le "bon" coin"#), None).unwrap();
        assert_eq!(
            query.to_lucene(),
            r#"denominationUniteLegale:"le \"bon\" coin""#
        );
    }

    #[test]
    fn test_lucene_query_strips_diacritics() {
        let query = SearchQuery::from_params(Some("le bar à pain"), Some("75")).unwrap();
        assert_eq!(
            query.to_lucene(),
            r#"denominationUniteLegale:"le bar a pain" AND codePostalEtablissement:75*"#
        );

        let query = SearchQuery::from_params(Some("Société Générale d'Élagage"), None).unwrap();
        assert_eq!(
            query.to_lucene(),
            r#"denominationUniteLegale:"Societe Generale d'Elagage""#
        );
    }

    #[test]
    fn test_siret_clue_searches_identifier() {
        let query = SearchQuery::from_params(Some("123 456 789 00012"), Some("38")).unwrap();
        assert_eq!(query.siret().unwrap().as_str(), "12345678900012");
        assert_eq!(query.to_lucene(), "siret:12345678900012");

        let query = SearchQuery::from_params(Some("1234"), None).unwrap();
        assert_eq!(query.siret(), None);
        assert_eq!(query.to_lucene(), r#"denominationUniteLegale:"1234""#);
    }

    #[test]
    fn test_missing_clue() {
        assert_eq!(
            SearchQuery::from_params(None, Some("38")).unwrap_err(),
            ValidationError::MissingParameter("clue")
        );
        assert_eq!(
            SearchQuery::from_params(Some("   "), None).unwrap_err(),
            ValidationError::MissingParameter("clue")
        );
    }
}
