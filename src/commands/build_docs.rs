use anyhow::{bail, Result};
use tracing::info;

use crate::cli::BuildDocsArgs;
use crate::documents::generate_documents;
use crate::util::write_jsonl;
use crate::workbook::load_workbook_tables;

pub fn run(args: BuildDocsArgs) -> Result<()> {
    if !args.input.exists() {
        bail!("input workbook not found: {}", args.input.display());
    }

    let tables = load_workbook_tables(&args.input)?;
    let documents = generate_documents(&tables);
    write_jsonl(&args.output, &documents)?;

    info!(
        documents = documents.len(),
        path = %args.output.display(),
        "wrote document corpus"
    );

    Ok(())
}
