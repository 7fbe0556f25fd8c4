//! Sirene API response types
//!
//! Wire types mirror the INSEE Sirene V3 `/siret` payloads. Only the fields the
//! gateway exposes are mapped; everything else is ignored on decode.
//!
//! Reference: https://api.insee.fr/catalogue/ (API Sirene, V3.11)

use serde::{Deserialize, Serialize};

/// `statutDiffusionEtablissement` of establishments withheld from publication.
pub const NON_DIFFUSIBLE: &str = "N";

/// Response to `GET /siret/{siret}`
#[derive(Debug, Clone, Deserialize)]
pub struct EtablissementResponse {
    #[serde(default)]
    pub header: Option<ResponseHeader>,
    pub etablissement: Etablissement,
}

/// Response to `GET /siret?q=...`
#[derive(Debug, Clone, Deserialize)]
pub struct EtablissementsResponse {
    #[serde(default)]
    pub header: Option<ResponseHeader>,
    #[serde(default)]
    pub etablissements: Vec<Etablissement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseHeader {
    pub statut: Option<u16>,
    pub message: Option<String>,
    pub total: Option<u64>,
    pub debut: Option<u64>,
    pub nombre: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Etablissement {
    pub siren: String,
    pub siret: String,
    #[serde(default)]
    pub unite_legale: Option<UniteLegale>,
    #[serde(default)]
    pub adresse_etablissement: Option<AdresseEtablissement>,
    #[serde(default)]
    pub periodes_etablissement: Vec<PeriodeEtablissement>,
    /// "O" for public establishments, "N" when the owner opted out of
    /// publication.
    #[serde(default)]
    pub statut_diffusion_etablissement: Option<String>,
}

impl Etablissement {
    /// False for establishments whose data must not be disclosed.
    pub fn is_diffusible(&self) -> bool {
        self.statut_diffusion_etablissement.as_deref() != Some(NON_DIFFUSIBLE)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniteLegale {
    pub denomination_unite_legale: Option<String>,
    pub activite_principale_unite_legale: Option<String>,
    /// Individual enterprises have no denomination, only a person's name.
    #[serde(default)]
    pub prenom1_unite_legale: Option<String>,
    #[serde(default)]
    pub nom_unite_legale: Option<String>,
}

impl UniteLegale {
    /// Denomination, or "<first name> <last name>" for an individual
    /// enterprise.
    pub fn display_name(&self) -> Option<String> {
        let denomination = self
            .denomination_unite_legale
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if let Some(denomination) = denomination {
            return Some(denomination.to_string());
        }

        let person: Vec<&str> = [&self.prenom1_unite_legale, &self.nom_unite_legale]
            .into_iter()
            .filter_map(|part| part.as_deref().map(str::trim))
            .filter(|part| !part.is_empty())
            .collect();
        (!person.is_empty()).then(|| person.join(" "))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdresseEtablissement {
    pub numero_voie_etablissement: Option<String>,
    pub indice_repetition_etablissement: Option<String>,
    pub type_voie_etablissement: Option<String>,
    pub libelle_voie_etablissement: Option<String>,
    pub complement_adresse_etablissement: Option<String>,
    pub code_postal_etablissement: Option<String>,
    pub code_commune_etablissement: Option<String>,
    pub libelle_commune_etablissement: Option<String>,
    pub coordonnee_lambert_abscisse_etablissement: Option<String>,
    pub coordonnee_lambert_ordonnee_etablissement: Option<String>,
}

/// Historized establishment state. The first period is the current one.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodeEtablissement {
    pub etat_administratif_etablissement: Option<String>,
    pub activite_principale_etablissement: Option<String>,
}

// ============================================================================
// Gateway record
// ============================================================================

/// Postal address of an establishment, components copied as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street_number: Option<String>,
    pub repetition_index: Option<String>,
    pub street_type: Option<String>,
    pub street_name: Option<String>,
    pub complement: Option<String>,
    pub postal_code: Option<String>,
    pub city_code: Option<String>,
    pub city: Option<String>,
}

/// Lambert 93 coordinates as published by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: String,
    pub y: String,
}

/// One business establishment as known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub siret: String,
    pub siren: String,
    pub name: Option<String>,
    /// NAF activity code of the establishment, falling back to the legal
    /// unit's code when the establishment has none.
    pub naf: Option<String>,
    pub administrative_status: Option<String>,
    pub address: Address,
    pub coordinates: Option<Coordinates>,
}

impl From<Etablissement> for RegistryRecord {
    fn from(etablissement: Etablissement) -> Self {
        let current_period = etablissement.periodes_etablissement.into_iter().next();
        let (administrative_status, establishment_naf) = match current_period {
            Some(p) => (
                p.etat_administratif_etablissement,
                p.activite_principale_etablissement,
            ),
            None => (None, None),
        };

        let (name, legal_unit_naf) = match etablissement.unite_legale {
            Some(u) => (u.display_name(), u.activite_principale_unite_legale),
            None => (None, None),
        };

        let adresse = etablissement.adresse_etablissement;
        let coordinates = adresse.as_ref().and_then(|a| {
            match (
                a.coordonnee_lambert_abscisse_etablissement.as_deref(),
                a.coordonnee_lambert_ordonnee_etablissement.as_deref(),
            ) {
                (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => Some(Coordinates {
                    x: x.to_string(),
                    y: y.to_string(),
                }),
                _ => None,
            }
        });
        let address = adresse
            .map(|a| Address {
                street_number: a.numero_voie_etablissement,
                repetition_index: a.indice_repetition_etablissement,
                street_type: a.type_voie_etablissement,
                street_name: a.libelle_voie_etablissement,
                complement: a.complement_adresse_etablissement,
                postal_code: a.code_postal_etablissement,
                city_code: a.code_commune_etablissement,
                city: a.libelle_commune_etablissement,
            })
            .unwrap_or_default();

        Self {
            siret: etablissement.siret,
            siren: etablissement.siren,
            name,
            naf: establishment_naf.or(legal_unit_naf),
            administrative_status,
            address,
            coordinates,
        }
    }
}
