use clap::{Parser, Subcommand};
use cnae_prospector::cnae::{list_cnaes, list_sectors};
use cnae_prospector::config::Config;
use cnae_prospector::export::{default_stem, file_exporter, ExportFormat, Exporter};
use cnae_prospector::handlers::{router, AppState};
use cnae_prospector::models::CompanyQuery;
use cnae_prospector::obs::init_tracing;
use cnae_prospector::pipeline::{Pipeline, PipelineRun};
use cnae_prospector::services::build_http_client;
use cnae_prospector::sheets::GoogleSheetsExporter;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// B2B lead prospecting by CNAE.
#[derive(Debug, Parser)]
#[command(name = "cnae-prospector", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Searches companies by CNAE and exports them.
    Buscar {
        /// CNAE code, e.g. 5611-2/01 or 5611201.
        #[arg(long)]
        cnae: String,
        /// State code (UF), e.g. MG.
        #[arg(long)]
        uf: Option<String>,
        /// City name. Requires --uf.
        #[arg(long)]
        cidade: Option<String>,
        /// Maximum number of companies (1-1000).
        #[arg(long, default_value_t = 100)]
        limite: usize,
        #[arg(long, value_enum, default_value_t = ExportFormat::Excel)]
        formato: ExportFormat,
        /// Output file name without extension.
        #[arg(long)]
        output: Option<String>,
        /// Also send the results to Google Sheets.
        #[arg(long)]
        sheets: bool,
        /// Clear the spreadsheet before writing.
        #[arg(long, requires = "sheets")]
        limpar_planilha: bool,
    },
    /// Lists the built-in CNAE catalog.
    Listar {
        /// Only this sector.
        #[arg(long)]
        setor: Option<String>,
    },
    /// Starts the HTTP server.
    Serve {
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
}

const EXIT_PIPELINE_FAILURE: u8 = 1;
const EXIT_EXPORT_FAILURE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Command::Listar { setor } = &cli.command {
        print_catalog(setor.as_deref());
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            return ExitCode::from(EXIT_PIPELINE_FAILURE);
        }
    };
    init_tracing(&config.log_level, config.production);
    tracing::info!("Configuration loaded successfully");

    match cli.command {
        Command::Buscar {
            cnae,
            uf,
            cidade,
            limite,
            formato,
            output,
            sheets,
            limpar_planilha,
        } => {
            let query = match CompanyQuery::new(&cnae, uf.as_deref(), cidade.as_deref(), limite) {
                Ok(query) => query,
                Err(e) => {
                    eprintln!("❌ {}", e);
                    return ExitCode::from(EXIT_PIPELINE_FAILURE);
                }
            };
            let export = ExportRequest {
                format: formato,
                stem: output.unwrap_or_else(|| default_stem(&query)),
                sheets,
                clear_sheet: limpar_planilha,
            };
            buscar(&config, query, export).await
        }
        Command::Serve { port } => match serve(config, port).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Server failed: {:#}", e);
                ExitCode::from(EXIT_PIPELINE_FAILURE)
            }
        },
        Command::Listar { .. } => ExitCode::SUCCESS,
    }
}

fn print_catalog(sector: Option<&str>) {
    let entries = list_cnaes(sector);
    if entries.is_empty() {
        println!("Nenhum CNAE para o setor informado. Setores: {}", list_sectors().join(", "));
        return;
    }
    for entry in entries {
        println!("{:<10} {:<14} {}", entry.code, entry.sector, entry.description);
    }
}

struct ExportRequest {
    format: ExportFormat,
    stem: String,
    sheets: bool,
    clear_sheet: bool,
}

async fn buscar(config: &Config, query: CompanyQuery, export: ExportRequest) -> ExitCode {
    let pipeline = match Pipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("❌ {}", e);
            return ExitCode::from(EXIT_PIPELINE_FAILURE);
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⚠️ Interrupted, finishing with partial results");
            on_interrupt.cancel();
        }
    });

    let mut run = match pipeline.run_with_cancel(&query, &cancel).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!("❌ Search failed: {}", e);
            eprintln!("❌ {}", e);
            return ExitCode::from(EXIT_PIPELINE_FAILURE);
        }
    };

    print_summary(&run);
    if run.records.is_empty() {
        println!("Nenhuma empresa encontrada.");
        return ExitCode::SUCCESS;
    }

    let file = file_exporter(export.format, &config.export_dir);
    let mut exporters: Vec<&dyn Exporter> = vec![file.as_ref()];
    let mut setup_failed = false;
    let sheets = if export.sheets {
        match build_http_client(config.request_timeout).and_then(|client| {
            GoogleSheetsExporter::from_config(client, config, export.clear_sheet)
        }) {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                eprintln!("❌ Google Sheets: {}", e);
                setup_failed = true;
                None
            }
        }
    } else {
        None
    };
    if let Some(sheets) = &sheets {
        exporters.push(sheets);
    }

    let report = run.export(&exporters, &export.stem).await;
    for (target, location) in report.locations() {
        println!("✅ {}: {}", target, location);
    }
    for (target, e) in report.failures() {
        eprintln!("❌ {}: {}", target, e);
    }

    if setup_failed || !report.all_succeeded() {
        ExitCode::from(EXIT_EXPORT_FAILURE)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_summary(run: &PipelineRun) {
    let stats = &run.stats;
    println!("CNAE {}: {} empresa(s)", run.query.cnae(), run.records.len());
    println!(
        "  BrasilAPI: {} consultada(s), {} com endereço, {} falha(s)",
        stats.fallback.requested, stats.fallback.filled, stats.fallback.failed
    );
    if let Some(enrichment) = &stats.enrichment {
        println!(
            "  RapidAPI: {} consultada(s), {} enriquecida(s), {} falha(s)",
            enrichment.requested, enrichment.filled, enrichment.failed
        );
    }
    if stats.cancelled {
        println!("  ⚠️ Resultado parcial (interrompido ou tempo esgotado)");
    }
}

async fn serve(mut config: Config, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.port = port;
    }

    let pipeline = Pipeline::from_config(&config)?;
    let app_state = Arc::new(AppState::new(config.clone(), pipeline)?);

    let app = router(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
