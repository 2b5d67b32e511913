/// Unit tests for input validation
/// Tests CNAE/UF normalization, CNPJ check digits, email and phone validation
use cnae_prospector::cnae::{describe, list_cnaes, list_sectors, normalize_cnae, normalize_uf};
use cnae_prospector::errors::AppError;
use cnae_prospector::models::CompanyQuery;
use cnae_prospector::validation::{
    clean_cnpj, format_br_phone, format_cnpj, is_valid_cnpj, is_valid_email, validate_br_phone,
};

#[cfg(test)]
mod cnae_tests {
    use super::*;

    #[test]
    fn test_cnae_accepts_common_spellings() {
        assert_eq!(normalize_cnae("5611-2/01").unwrap(), "5611-2/01");
        assert_eq!(normalize_cnae("5611201").unwrap(), "5611-2/01");
        assert_eq!(normalize_cnae(" 5611.2-01 ").unwrap(), "5611-2/01");
    }

    #[test]
    fn test_cnae_rejects_garbage() {
        assert!(matches!(normalize_cnae(""), Err(AppError::Validation(_))));
        assert!(matches!(normalize_cnae("561120"), Err(AppError::Validation(_))));
        assert!(matches!(normalize_cnae("56112011"), Err(AppError::Validation(_))));
        assert!(matches!(normalize_cnae("5611-2/0a"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_uf_is_checked_against_states() {
        assert_eq!(normalize_uf("mg").unwrap(), "MG");
        assert_eq!(normalize_uf(" sp ").unwrap(), "SP");
        assert!(normalize_uf("XX").is_err());
        assert!(normalize_uf("Minas").is_err());
    }

    #[test]
    fn test_catalog() {
        assert!(!list_cnaes(None).is_empty());
        assert!(describe("5611201").is_some());

        for sector in list_sectors() {
            let entries = list_cnaes(Some(sector));
            assert!(!entries.is_empty());
            assert!(entries.iter().all(|e| e.sector == sector));
        }
    }

    #[test]
    fn test_query_limit_bounds() {
        assert!(CompanyQuery::new("5611-2/01", None, None, 1).is_ok());
        assert!(CompanyQuery::new("5611-2/01", None, None, 1000).is_ok());
        assert!(CompanyQuery::new("5611-2/01", None, None, 1001).is_err());
        assert!(CompanyQuery::new("5611-2/01", None, None, 0).is_err());
    }
}

#[cfg(test)]
mod cnpj_tests {
    use super::*;

    #[test]
    fn test_clean_cnpj() {
        assert_eq!(clean_cnpj("11.222.333/0001-81").as_deref(), Some("11222333000181"));
        assert_eq!(clean_cnpj("11222333000181").as_deref(), Some("11222333000181"));
        assert_eq!(clean_cnpj("1122233300018"), None);
        assert_eq!(clean_cnpj(""), None);
    }

    #[test]
    fn test_check_digits() {
        assert!(is_valid_cnpj("11.222.333/0001-81"));
        assert!(is_valid_cnpj("11444777000161"));
        assert!(!is_valid_cnpj("11444777000162"));
        assert!(!is_valid_cnpj("00000000000000"));
    }

    #[test]
    fn test_format() {
        assert_eq!(format_cnpj("11444777000161"), "11.444.777/0001-61");
        assert_eq!(format_cnpj("11.444.777/0001-61"), "11.444.777/0001-61");
    }
}

#[cfg(test)]
mod email_validation_tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("contato@restaurante.com.br"));
        assert!(is_valid_email("test.user@example.com"));
        assert!(is_valid_email("user+tag@example.co.uk"));
        assert!(is_valid_email("user_name@example-domain.com"));
        assert!(is_valid_email("a@b.c"));
    }

    #[test]
    fn test_invalid_emails_basic() {
        // Missing @ or .
        assert!(!is_valid_email("userexample.com"));
        assert!(!is_valid_email("user@examplecom"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));

        // Too short
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_invalid_emails_fake_patterns() {
        assert!(!is_valid_email("11999999999@example.com"));
        assert!(!is_valid_email("1111111111@gmail.com"));
        assert!(!is_valid_email("000000@example.com"));
        assert!(!is_valid_email("test123456789@example.com"));
    }

    #[test]
    fn test_invalid_emails_malformed() {
        assert!(!is_valid_email("user @example.com"));
        assert!(!is_valid_email("user@exam ple.com"));
    }
}

#[cfg(test)]
mod phone_validation_tests {
    use super::*;

    #[test]
    fn test_valid_brazilian_phones() {
        let (valid, normalized) = validate_br_phone("34987654321");
        assert!(valid);
        assert_eq!(normalized, "+5534987654321");

        let (valid, normalized) = validate_br_phone("(11) 98765-4321");
        assert!(valid);
        assert_eq!(normalized, "+5511987654321");

        let (valid, normalized) = validate_br_phone("+5511987654321");
        assert!(valid);
        assert_eq!(normalized, "+5511987654321");
    }

    #[test]
    fn test_valid_brazilian_landlines() {
        let (valid, normalized) = validate_br_phone("1133334444");
        assert!(valid);
        assert_eq!(normalized, "+551133334444");
    }

    #[test]
    fn test_invalid_phones() {
        let (valid, _) = validate_br_phone("1234");
        assert!(!valid);

        let (valid, _) = validate_br_phone("");
        assert!(!valid);

        let (valid, _) = validate_br_phone("   ");
        assert!(!valid);
    }

    #[test]
    fn test_display_format() {
        assert_eq!(format_br_phone("11987654321"), "(11) 98765-4321");
        assert_eq!(format_br_phone("551133334444"), "(11) 3333-4444");
    }
}
