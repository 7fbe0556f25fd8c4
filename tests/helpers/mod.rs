//! Shared fixtures: a wiremock registry + token endpoint, and clients wired
//! to it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sirene_gateway::sirene::{HttpCredentialExchange, RegistryClient, TokenCache};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SIRET: &str = "12345678900012";
pub const SECRET: &str = "Y29uc3VtZXI6c2VjcmV0";

pub fn token_response(value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": value,
        "scope": "am_application_scope default",
        "token_type": "Bearer",
        "expires_in": 604800
    }))
}

/// Token endpoint that issues `values` in order, one exchange each.
pub async fn mount_tokens(server: &MockServer, values: &[&str]) {
    for value in values {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response(value))
            .up_to_n_times(1)
            .expect(1)
            .mount(server)
            .await;
    }
}

pub fn etablissement(siret: &str, name: &str) -> Value {
    json!({
        "siren": &siret[..9],
        "siret": siret,
        "uniteLegale": {
            "denominationUniteLegale": name,
            "activitePrincipaleUniteLegale": "38.32Z"
        },
        "adresseEtablissement": {
            "numeroVoieEtablissement": "12",
            "typeVoieEtablissement": "RUE",
            "libelleVoieEtablissement": "DES ALPES",
            "codePostalEtablissement": "38100",
            "codeCommuneEtablissement": "38185",
            "libelleCommuneEtablissement": "GRENOBLE",
            "coordonneeLambertAbscisseEtablissement": "913245.5",
            "coordonneeLambertOrdonneeEtablissement": "6457612.1"
        },
        "periodesEtablissement": [
            {
                "etatAdministratifEtablissement": "A",
                "activitePrincipaleEtablissement": null
            }
        ]
    })
}

/// Establishment whose owner opted out of publication.
pub fn withheld_etablissement(siret: &str, name: &str) -> Value {
    let mut value = etablissement(siret, name);
    value["statutDiffusionEtablissement"] = json!("N");
    value
}

pub fn etablissement_response(siret: &str, name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "header": { "statut": 200, "message": "ok" },
        "etablissement": etablissement(siret, name)
    }))
}

pub fn token_cache(server: &MockServer) -> Arc<TokenCache> {
    let token_url = Url::parse(&format!("{}/token", server.uri())).unwrap();
    let exchange = HttpCredentialExchange::new(reqwest::Client::new(), token_url, SECRET);
    Arc::new(TokenCache::new(
        Arc::new(exchange),
        Duration::from_secs(3600),
    ))
}

pub fn registry_client(server: &MockServer) -> RegistryClient {
    let base_url = Url::parse(&server.uri()).unwrap();
    RegistryClient::new(reqwest::Client::new(), &base_url, token_cache(server))
}
