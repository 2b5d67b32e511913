//! City name → IBGE municipality code.

use crate::errors::AppError;
use crate::services::{BrasilApiClient, Municipality};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Major cities, answered without a network call.
const KNOWN_MUNICIPALITIES: [(&str, &str, &str); 10] = [
    ("uberlandia", "MG", "3170206"),
    ("sao paulo", "SP", "3550308"),
    ("rio de janeiro", "RJ", "3304557"),
    ("belo horizonte", "MG", "3106200"),
    ("brasilia", "DF", "5300108"),
    ("curitiba", "PR", "4106902"),
    ("porto alegre", "RS", "4314902"),
    ("salvador", "BA", "2927408"),
    ("fortaleza", "CE", "2304400"),
    ("recife", "PE", "2611606"),
];

/// Lower-case, accent-free, single-spaced form used for comparisons.
pub fn fold_name(name: &str) -> String {
    let folded: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            '\'' | '-' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct IbgeResolver {
    brasil_api: Arc<BrasilApiClient>,
    /// Municipality list per UF.
    by_state: Cache<String, Arc<Vec<Municipality>>>,
}

impl IbgeResolver {
    pub fn new(brasil_api: Arc<BrasilApiClient>) -> Self {
        Self {
            brasil_api,
            by_state: Cache::builder()
                .time_to_live(Duration::from_secs(24 * 3600))
                .max_capacity(27)
                .build(),
        }
    }

    /// Static table lookup only.
    pub fn known_code(city: &str, uf: &str) -> Option<&'static str> {
        let city = fold_name(city);
        KNOWN_MUNICIPALITIES
            .iter()
            .find(|(name, state, _)| *name == city && state.eq_ignore_ascii_case(uf))
            .map(|(_, _, code)| *code)
    }

    /// Resolves a city to its IBGE code.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - the state has no municipality with that name.
    pub async fn resolve(&self, city: &str, uf: &str) -> Result<Option<String>, AppError> {
        if let Some(code) = Self::known_code(city, uf) {
            return Ok(Some(code.to_string()));
        }

        let uf = uf.to_uppercase();
        let municipalities = match self.by_state.get(&uf).await {
            Some(list) => list,
            None => {
                let list = Arc::new(self.brasil_api.list_municipalities(&uf).await?);
                self.by_state.insert(uf.clone(), list.clone()).await;
                list
            }
        };

        let wanted = fold_name(city);
        let code = municipalities
            .iter()
            .find(|m| fold_name(&m.name) == wanted)
            .map(|m| m.ibge_code.clone());

        match &code {
            Some(c) => tracing::info!("🗺️ {}/{} → IBGE {}", city, uf, c),
            None => tracing::warn!("⚠️ Municipality {}/{} not found", city, uf),
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_name() {
        assert_eq!(fold_name("  Uberlândia "), "uberlandia");
        assert_eq!(fold_name("São  João d'Aliança"), "sao joao d alianca");
        assert_eq!(fold_name("Embu-Guaçu"), "embu guacu");
    }

    #[test]
    fn test_known_code_is_accent_insensitive() {
        assert_eq!(IbgeResolver::known_code("Uberlândia", "mg"), Some("3170206"));
        assert_eq!(IbgeResolver::known_code("SAO PAULO", "SP"), Some("3550308"));
        assert_eq!(IbgeResolver::known_code("Uberlândia", "SP"), None);
    }
}
