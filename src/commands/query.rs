use anyhow::{bail, Context, Result};
use tracing::info;

use crate::cli::QueryArgs;
use crate::retriever::{RetrieverOptions, SharedRetriever};

pub fn run(args: QueryArgs) -> Result<()> {
    let shared = SharedRetriever::new(RetrieverOptions {
        index_path: args.index_path.clone(),
        api_key: args.api_key.clone(),
        model: None,
    });

    // The dependent features treat an unavailable retriever as "no context";
    // the CLI surfaces it instead so operators see why nothing comes back.
    let Some(retriever) = shared.get() else {
        bail!("retriever unavailable; see the log output above for the cause");
    };

    info!(
        model = %retriever.model(),
        documents = retriever.document_count(),
        top_k = args.top_k,
        min_score = args.min_score,
        "running similarity query"
    );

    let hits = retriever.search(&args.query, args.top_k, args.min_score);

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&hits).context("failed to serialize query hits")?;
        println!("{rendered}");
        return Ok(());
    }

    if hits.is_empty() {
        println!("no results at or above min_score {}", args.min_score);
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. score={:.3} id={} name={}",
            rank + 1,
            hit.score,
            hit.metadata.id,
            hit.metadata.name
        );
        println!("{}", hit.text);
        println!();
    }

    Ok(())
}
