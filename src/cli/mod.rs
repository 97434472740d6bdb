//! The command line interface of `keysignerd`.
//!
//! Every invocation builds the signer from the config file, runs a single
//! command against it and reports the outcome as JSON.

mod report;
pub use self::report::*;

use std::path::PathBuf;

use crate::{
    commons::{
        api::{CertRequestFormat, ClientId, KeyUsage},
        util::file,
        SignerResult,
    },
    constants::{KEYSIGNER_DEFAULT_CONFIG_FILE, KEYSIGNER_ENV_CONFIG, KEYSIGNER_ENV_PIN, SOFT_TOKEN_ID},
    daemon::signer::Signer,
};

//------------ Options -------------------------------------------------------

#[derive(clap::Parser)]
#[command(version, about = "Keeps the keys of a data exchange node and signs with them")]
pub struct Options {
    /// Path to the config file
    #[arg(short, long, env = KEYSIGNER_ENV_CONFIG, default_value = KEYSIGNER_DEFAULT_CONFIG_FILE)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Set the first PIN of the software token
    InitSoftwareToken(InitSoftwareToken),

    /// Show all tokens with their keys, certificates and requests
    ListTokens(ListTokens),

    /// Generate a key on a token
    GenerateKey(GenerateKey),

    /// Generate a certificate request for a key
    GenerateCsr(GenerateCsr),

    /// Import a certificate for one of the keys
    ImportCert(ImportCert),

    /// Delete a key with its certificates and requests
    DeleteKey(DeleteKey),
}

impl Command {
    pub fn run(self, signer: &Signer) -> SignerResult<Report> {
        match self {
            Self::InitSoftwareToken(cmd) => cmd.run(signer),
            Self::ListTokens(cmd) => cmd.run(signer),
            Self::GenerateKey(cmd) => cmd.run(signer),
            Self::GenerateCsr(cmd) => cmd.run(signer),
            Self::ImportCert(cmd) => cmd.run(signer),
            Self::DeleteKey(cmd) => cmd.run(signer),
        }
    }
}

/// Logs in to the token that holds a key.
fn activate_for_key(signer: &Signer, key_id: &str, pin: &str) -> SignerResult<()> {
    let token = signer.get_token_for_key_id(key_id)?;
    signer.activate_token(&token.id, pin)
}

//------------ InitSoftwareToken ---------------------------------------------

#[derive(clap::Parser)]
pub struct InitSoftwareToken {
    /// The PIN to protect the software token with
    #[arg(long, env = KEYSIGNER_ENV_PIN)]
    pin: String,
}

impl InitSoftwareToken {
    fn run(self, signer: &Signer) -> SignerResult<Report> {
        signer.init_software_token(&self.pin)?;
        Ok(Report::Empty)
    }
}

//------------ ListTokens ----------------------------------------------------

#[derive(clap::Parser)]
pub struct ListTokens;

impl ListTokens {
    fn run(self, signer: &Signer) -> SignerResult<Report> {
        signer.list_tokens().map(Report::Tokens)
    }
}

//------------ GenerateKey ---------------------------------------------------

#[derive(clap::Parser)]
pub struct GenerateKey {
    /// The token to generate the key on
    #[arg(long, short, value_name = "id", default_value = SOFT_TOKEN_ID)]
    token: String,

    /// The label of the new key
    #[arg(long, short, value_name = "label")]
    label: String,

    /// The PIN of the token
    #[arg(long, env = KEYSIGNER_ENV_PIN)]
    pin: String,
}

impl GenerateKey {
    fn run(self, signer: &Signer) -> SignerResult<Report> {
        signer.activate_token(&self.token, &self.pin)?;
        signer.generate_key(&self.token, &self.label).map(Report::Key)
    }
}

//------------ GenerateCsr ---------------------------------------------------

#[derive(clap::Parser)]
pub struct GenerateCsr {
    /// The key to make the request for
    #[arg(long, short, value_name = "id")]
    key: String,

    /// What the certificate will be used for: signing or authentication
    #[arg(long, short, value_name = "usage")]
    usage: KeyUsage,

    /// The member the certificate is for, as instance:class:code
    #[arg(long, short, value_name = "client id")]
    member: Option<ClientId>,

    /// The subject distinguished name, e.g. "C=FI, O=Org, CN=1234"
    #[arg(long, short, value_name = "dn")]
    subject: String,

    /// Encoding of the request: der or pem
    #[arg(long, short, value_name = "format", default_value = "pem")]
    format: CertRequestFormat,

    /// Also write the request to this file
    #[arg(long, short, value_name = "path")]
    out: Option<PathBuf>,

    /// The PIN of the token holding the key
    #[arg(long, env = KEYSIGNER_ENV_PIN)]
    pin: String,
}

impl GenerateCsr {
    fn run(self, signer: &Signer) -> SignerResult<Report> {
        activate_for_key(signer, &self.key, &self.pin)?;
        let req = signer.generate_cert_request(
            &self.key,
            self.member.as_ref(),
            self.usage,
            &self.subject,
            self.format,
        )?;
        if let Some(out) = &self.out {
            file::save(&req.cert_request, out)?;
        }
        Ok(Report::CertRequest(req))
    }
}

//------------ ImportCert ----------------------------------------------------

#[derive(clap::Parser)]
pub struct ImportCert {
    /// Path to the DER or PEM encoded certificate
    #[arg(long, short, value_name = "path")]
    cert: PathBuf,

    /// The status to start out with
    #[arg(long, short, value_name = "status", default_value = "saved")]
    status: String,

    /// The member a signing certificate is for, as instance:class:code
    #[arg(long, short, value_name = "client id")]
    member: Option<ClientId>,
}

impl ImportCert {
    fn run(self, signer: &Signer) -> SignerResult<Report> {
        let bytes = file::read(&self.cert)?;
        signer
            .import_cert(&bytes, &self.status, self.member.as_ref())
            .map(Report::KeyId)
    }
}

//------------ DeleteKey -----------------------------------------------------

#[derive(clap::Parser)]
pub struct DeleteKey {
    /// The key to delete
    #[arg(long, short, value_name = "id")]
    key: String,

    /// Erase the key from its token too, this needs the token PIN
    #[arg(long)]
    from_device: bool,

    /// The PIN of the token holding the key
    #[arg(long, env = KEYSIGNER_ENV_PIN)]
    pin: Option<String>,
}

impl DeleteKey {
    fn run(self, signer: &Signer) -> SignerResult<Report> {
        if self.from_device {
            let pin = self.pin.as_deref().unwrap_or_default();
            activate_for_key(signer, &self.key, pin)?;
        }
        signer.delete_key(&self.key, self.from_device)?;
        Ok(Report::Empty)
    }
}

//------------ Tests ---------------------------------------------------------
