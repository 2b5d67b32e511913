//! CNAE code handling and the built-in catalog of common activities.

use crate::errors::AppError;
use crate::validation::only_digits;
use serde::Serialize;

/// One CNAE subclass known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CnaeEntry {
    pub code: &'static str,
    pub description: &'static str,
    pub sector: &'static str,
}

const fn entry(code: &'static str, description: &'static str, sector: &'static str) -> CnaeEntry {
    CnaeEntry {
        code,
        description,
        sector,
    }
}

/// Common activities for prospecting, sorted by code.
pub const CNAE_CATALOG: &[CnaeEntry] = &[
    entry("4110-7/00", "Incorporação de empreendimentos imobiliários", "Construção"),
    entry("4120-4/00", "Construção de edifícios", "Construção"),
    entry("4520-0/01", "Serviços de manutenção e reparação mecânica de veículos automotores", "Automotivo"),
    entry("4520-0/03", "Serviços de manutenção e reparação elétrica de veículos automotores", "Automotivo"),
    entry("4711-3/02", "Comércio varejista de mercadorias em geral, com predominância de produtos alimentícios - supermercados", "Comércio"),
    entry("4712-1/00", "Comércio varejista de mercadorias em geral, com predominância de produtos alimentícios - minimercados, mercearias e armazéns", "Comércio"),
    entry("4721-1/04", "Comércio varejista de doces, balas, bombons e semelhantes", "Comércio"),
    entry("4731-8/00", "Comércio varejista de combustíveis para veículos automotores", "Combustíveis"),
    entry("4771-7/01", "Comércio varejista de produtos farmacêuticos, sem manipulação de fórmulas", "Comércio"),
    entry("4772-5/00", "Comércio varejista de cosméticos, produtos de perfumaria e de higiene pessoal", "Comércio"),
    entry("4773-3/00", "Comércio varejista de artigos médicos e ortopédicos", "Comércio"),
    entry("5611-2/01", "Restaurantes e similares", "Alimentação"),
    entry("5611-2/03", "Lanchonetes, casas de chá, de sucos e similares", "Alimentação"),
    entry("5611-2/04", "Bares e outros estabelecimentos especializados em servir bebidas, sem entretenimento", "Alimentação"),
    entry("6201-5/01", "Desenvolvimento de programas de computador sob encomenda", "Tecnologia"),
    entry("6202-3/00", "Desenvolvimento e licenciamento de programas de computador customizáveis", "Tecnologia"),
    entry("6203-1/00", "Desenvolvimento e licenciamento de programas de computador não-customizáveis", "Tecnologia"),
    entry("6810-2/02", "Aluguel de imóveis próprios", "Imobiliário"),
    entry("6822-6/00", "Gestão e administração da propriedade imobiliária", "Imobiliário"),
    entry("6920-6/01", "Atividades de contabilidade", "Serviços Profissionais"),
    entry("6920-6/02", "Atividades de consultoria e auditoria contábil e tributária", "Serviços Profissionais"),
    entry("8593-7/00", "Ensino de idiomas", "Educação"),
    entry("8599-6/04", "Treinamento em desenvolvimento profissional e gerencial", "Educação"),
    entry("8630-5/01", "Atividade médica ambulatorial com recursos para realização de procedimentos cirúrgicos", "Saúde"),
    entry("8630-5/03", "Atividade médica ambulatorial restrita a consultas", "Saúde"),
    entry("8650-0/03", "Atividades de psicologia e psicanálise", "Saúde"),
    entry("9602-5/01", "Cabeleireiros, manicure e pedicure", "Beleza"),
    entry("9602-5/02", "Atividades de estética e outros serviços de cuidados com a beleza", "Beleza"),
];

/// The 27 federative units.
pub const BRAZILIAN_STATES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR",
    "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

/// Canonicalises a CNAE code to `NNNN-N/NN`.
///
/// Accepts the canonical form or the 7 digits with any mix of `-`, `.`, `/` and spaces.
pub fn normalize_cnae(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let allowed = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | '/' | ' '));
    let digits = only_digits(trimmed);

    if !allowed || digits.len() != 7 {
        return Err(AppError::Validation(format!(
            "CNAE inválido '{}': use o formato NNNN-N/NN",
            raw
        )));
    }

    Ok(format!("{}-{}/{}", &digits[0..4], &digits[4..5], &digits[5..7]))
}

/// Canonicalises a state code, rejecting anything outside [`BRAZILIAN_STATES`].
pub fn normalize_uf(raw: &str) -> Result<String, AppError> {
    let uf = raw.trim().to_uppercase();
    if BRAZILIAN_STATES.contains(&uf.as_str()) {
        Ok(uf)
    } else {
        Err(AppError::Validation(format!("UF inválida: '{}'", raw)))
    }
}

/// Lists catalog entries, optionally restricted to one sector (case-insensitive).
pub fn list_cnaes(sector: Option<&str>) -> Vec<&'static CnaeEntry> {
    CNAE_CATALOG
        .iter()
        .filter(|e| sector.map_or(true, |s| e.sector.to_lowercase() == s.trim().to_lowercase()))
        .collect()
}

/// Distinct sectors, sorted.
pub fn list_sectors() -> Vec<&'static str> {
    let mut sectors: Vec<&'static str> = CNAE_CATALOG.iter().map(|e| e.sector).collect();
    sectors.sort_unstable();
    sectors.dedup();
    sectors
}

/// Looks up a code in the catalog. The input may be in any accepted format.
pub fn describe(code: &str) -> Option<&'static CnaeEntry> {
    let code = normalize_cnae(code).ok()?;
    CNAE_CATALOG.iter().find(|e| e.code == code)
}
