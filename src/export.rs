//! CRM spreadsheet layout and the file exporters (CSV, Excel).

use crate::errors::{AppError, ResultExt};
use crate::models::{CompanyQuery, CompanyRecord};
use crate::validation::{format_br_phone, validate_br_phone};
use async_trait::async_trait;
use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook, XlsxError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column titles of the CRM layout, in order.
pub const CRM_HEADERS: [&str; 25] = [
    "CNPJ",
    "Razão Social",
    "Nome Fantasia",
    "Status",
    "Setor (CNAE)",
    "Atividade Principal",
    "Porte Empresa",
    "Data Abertura",
    "Telefone Principal",
    "Telefone Validado",
    "Email Contato",
    "Endereço Completo",
    "Rua",
    "Número",
    "Complemento",
    "Bairro",
    "Cidade",
    "Estado (UF)",
    "CEP",
    "Fonte dos Dados",
    "Data da Consulta",
    "Lead Score",
    "Observações",
    "Responsável",
    "Status Contato",
];

const COLUMN_WIDTHS: [f64; 25] = [
    20.0, 40.0, 30.0, 12.0, 14.0, 45.0, 22.0, 14.0, 18.0, 18.0, 30.0, 60.0, 35.0, 10.0, 20.0,
    25.0, 22.0, 12.0, 12.0, 28.0, 18.0, 24.0, 30.0, 20.0, 18.0,
];

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    #[default]
    Excel,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xlsx",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Excel => f.write_str("excel"),
        }
    }
}

/// A destination for a finished result set.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Human-readable destination name for logs and reports.
    fn target(&self) -> &'static str;

    /// Writes `records` and returns where they went (path or URL).
    async fn export(&self, records: &[CompanyRecord], stem: &str) -> Result<String, AppError>;
}

fn format_cep(cep: &str) -> String {
    if cep.len() == 8 {
        format!("{}-{}", &cep[..5], &cep[5..])
    } else {
        cep.to_string()
    }
}

/// Renders one record in CRM column order.
///
/// # Arguments
///
/// * `record` - A merged, scored record.
/// * `consulted_at` - Value of the "Data da Consulta" column.
pub fn crm_row(record: &CompanyRecord, consulted_at: &str) -> Vec<String> {
    let d = &record.details;
    let address = d.address.clone().unwrap_or_default();
    let text = |v: &Option<String>| v.clone().unwrap_or_default();

    let validated_phone = d
        .phone
        .as_deref()
        .map(validate_br_phone)
        .filter(|(valid, _)| *valid)
        .map(|(_, e164)| e164)
        .unwrap_or_default();

    vec![
        record.formatted_cnpj(),
        record.legal_name.clone(),
        d.trade_name.clone().unwrap_or_else(|| record.legal_name.clone()),
        text(&d.status),
        text(&d.cnae),
        text(&d.activity),
        d.company_size
            .clone()
            .unwrap_or_else(|| "Não informado".to_string()),
        d.opening_date
            .map(|date| date.format("%d/%m/%Y").to_string())
            .unwrap_or_default(),
        d.phone.as_deref().map(format_br_phone).unwrap_or_default(),
        validated_phone,
        text(&d.email),
        d.address.as_ref().map(|a| a.full()).unwrap_or_default(),
        text(&address.street),
        text(&address.number),
        text(&address.complement),
        text(&address.neighborhood),
        text(&address.city),
        text(&address.uf),
        address.cep.as_deref().map(format_cep).unwrap_or_default(),
        record.sources_label(),
        consulted_at.to_string(),
        record
            .lead_score
            .map(|s| s.to_string())
            .unwrap_or_default(),
        record.crm.observations.clone(),
        record.crm.owner.clone(),
        record.crm.contact_status.clone(),
    ]
}

/// `empresas_5611201_MG_20240101_120000`
pub fn default_stem(query: &CompanyQuery) -> String {
    let mut stem = format!("empresas_{}", query.cnae_digits());
    if let Some(uf) = query.uf() {
        stem.push('_');
        stem.push_str(uf);
    }
    stem.push_str(&chrono::Local::now().format("_%Y%m%d_%H%M%S").to_string());
    stem
}

fn consulted_now() -> String {
    chrono::Local::now().format("%d/%m/%Y %H:%M").to_string()
}

fn ensure_not_empty(records: &[CompanyRecord]) -> Result<(), AppError> {
    if records.is_empty() {
        return Err(AppError::Validation(
            "Nenhuma empresa para exportar".to_string(),
        ));
    }
    Ok(())
}

/// Writes a UTF-8 (with BOM) CSV in CRM layout.
pub fn write_csv(path: &Path, records: &[CompanyRecord], consulted_at: &str) -> Result<(), AppError> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    // BOM so spreadsheet apps detect UTF-8.
    file.write_all(b"\xEF\xBB\xBF")
        .context("Failed to write CSV header")?;

    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(CRM_HEADERS)
        .map_err(|e| AppError::Export(format!("CSV write failed: {}", e)))?;
    for record in records {
        writer
            .write_record(crm_row(record, consulted_at))
            .map_err(|e| AppError::Export(format!("CSV write failed: {}", e)))?;
    }
    writer.flush().context("Failed to flush CSV")?;
    Ok(())
}

fn xlsx_err(e: XlsxError) -> AppError {
    AppError::Export(format!("Excel write failed: {}", e))
}

/// Writes an `.xlsx` workbook: sheet "Empresas" in CRM layout and a
/// "Por UF" summary.
pub fn write_workbook(
    path: &Path,
    records: &[CompanyRecord],
    consulted_at: &str,
) -> Result<(), AppError> {
    let mut workbook = Workbook::new();
    let header = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0x1F4E78))
        .set_border(FormatBorder::Thin);

    let sheet = workbook.add_worksheet();
    sheet.set_name("Empresas").map_err(xlsx_err)?;
    for (col, title) in CRM_HEADERS.iter().enumerate() {
        let col = col as u16;
        sheet
            .write_string_with_format(0, col, *title, &header)
            .map_err(xlsx_err)?;
        sheet
            .set_column_width(col, COLUMN_WIDTHS[col as usize])
            .map_err(xlsx_err)?;
    }
    for (i, record) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        for (col, value) in crm_row(record, consulted_at).into_iter().enumerate() {
            sheet.write_string(row, col as u16, value).map_err(xlsx_err)?;
        }
    }
    sheet.set_freeze_panes(1, 0).map_err(xlsx_err)?;
    sheet
        .autofilter(0, 0, records.len() as u32, (CRM_HEADERS.len() - 1) as u16)
        .map_err(xlsx_err)?;

    let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        let uf = record
            .details
            .address
            .as_ref()
            .and_then(|a| a.uf.clone())
            .unwrap_or_else(|| "N/I".to_string());
        *by_state.entry(uf).or_default() += 1;
    }

    let summary = workbook.add_worksheet();
    summary.set_name("Por UF").map_err(xlsx_err)?;
    summary
        .write_string_with_format(0, 0, "UF", &header)
        .map_err(xlsx_err)?;
    summary
        .write_string_with_format(0, 1, "Empresas", &header)
        .map_err(xlsx_err)?;
    for (i, (uf, count)) in by_state.iter().enumerate() {
        let row = (i + 1) as u32;
        summary.write_string(row, 0, uf).map_err(xlsx_err)?;
        summary
            .write_number(row, 1, *count as f64)
            .map_err(xlsx_err)?;
    }

    workbook.save(path).map_err(xlsx_err)?;
    Ok(())
}

pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Runs file writing on the blocking pool.
async fn write_blocking<F>(job: F) -> Result<(), AppError>
where
    F: FnOnce() -> Result<(), AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| AppError::Export(format!("Export task failed: {}", e)))?
}

fn create_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

#[async_trait]
impl Exporter for CsvExporter {
    fn target(&self) -> &'static str {
        "CSV"
    }

    async fn export(&self, records: &[CompanyRecord], stem: &str) -> Result<String, AppError> {
        ensure_not_empty(records)?;
        let dir = self.dir.clone();
        let path = self.dir.join(format!("{}.csv", stem));
        let target = path.clone();
        let rows = records.to_vec();

        write_blocking(move || {
            create_dir(&dir)?;
            write_csv(&target, &rows, &consulted_now())
        })
        .await?;

        tracing::info!("📄 CSV exported: {} ({} records)", path.display(), records.len());
        Ok(path.display().to_string())
    }
}

pub struct ExcelExporter {
    dir: PathBuf,
}

impl ExcelExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Exporter for ExcelExporter {
    fn target(&self) -> &'static str {
        "Excel"
    }

    async fn export(&self, records: &[CompanyRecord], stem: &str) -> Result<String, AppError> {
        ensure_not_empty(records)?;
        let dir = self.dir.clone();
        let path = self.dir.join(format!("{}.xlsx", stem));
        let target = path.clone();
        let rows = records.to_vec();

        write_blocking(move || {
            create_dir(&dir)?;
            write_workbook(&target, &rows, &consulted_now())
        })
        .await?;

        tracing::info!("📊 Excel exported: {} ({} records)", path.display(), records.len());
        Ok(path.display().to_string())
    }
}

/// File exporter for a format.
pub fn file_exporter(format: ExportFormat, dir: &Path) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Csv => Box::new(CsvExporter::new(dir)),
        ExportFormat::Excel => Box::new(ExcelExporter::new(dir)),
    }
}
