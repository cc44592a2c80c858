//! Interactive lookup of one certificate from the command line.
//!
//! The CAPTCHA image is written to disk, its solution is read from stdin, and
//! the certificate is printed as JSON (or a single field with `--field`).
//!
//! ```bash
//! fetch_certificate RSSMRA80A01H501U 389564456 --pdf certificato.pdf
//! fetch_certificate RSSMRA80A01H501U 389564456 --field ammalato_al
//! ```

use base64::Engine;
use certificati_inps::client::{CertificateQuery, InpsClient, Session};
use certificati_inps::config::Config;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fetch_certificate",
    about = "Downloads a sick-leave certificate from the INPS citizen portal."
)]
struct Args {
    /// Fiscal code of the certified person
    fiscal_code: String,

    /// Protocol number of the certificate
    protocol_number: String,

    /// Where to save the CAPTCHA image
    #[arg(long, value_parser, default_value = "captcha.png")]
    captcha: PathBuf,

    /// Also download the PDF and save it here
    #[arg(long, value_parser)]
    pdf: Option<PathBuf>,

    /// Print only this field (exported name, e.g. `cognome`)
    #[arg(long)]
    field: Option<String>,

    /// Save the page the certificate was decoded from
    #[arg(long, value_parser)]
    html: Option<PathBuf>,
}

impl Args {
    fn query(&self, captcha: &str) -> CertificateQuery {
        CertificateQuery {
            fiscal_code: self.fiscal_code.trim().to_uppercase(),
            protocol_number: self.protocol_number.trim().to_string(),
            captcha: captcha.trim().to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let client = InpsClient::from_config(&config)?;

    let challenge = client.get_captcha().await?;
    let image = base64::engine::general_purpose::STANDARD.decode(&challenge.captcha)?;
    std::fs::write(&args.captcha, image)?;

    eprint!("CAPTCHA saved to {}, enter its text: ", args.captcha.display());
    io::stderr().flush()?;
    let mut solution = String::new();
    io::stdin().lock().read_line(&mut solution)?;

    let session = Session::new(challenge.session_id);
    let certificate = client
        .fetch_certificate(&session, &args.query(&solution), args.pdf.is_some())
        .await?;

    if let Some(path) = &args.pdf {
        if let Some(bytes) = certificate.pdf_bytes()? {
            std::fs::write(path, bytes)?;
            eprintln!("✓ PDF saved to {}", path.display());
        }
    }

    if let Some(path) = &args.html {
        std::fs::write(path, certificate.html())?;
        eprintln!("✓ Page saved to {}", path.display());
    }

    match &args.field {
        Some(name) => println!("{}", certificate.field(name)?.display()),
        None => println!("{}", serde_json::to_string_pretty(&certificate)?),
    }

    Ok(())
}
