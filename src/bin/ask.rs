use std::env;

use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

use ecombot::assistant::rag::RagChain;
use ecombot::assistant::router::{route, Route};
use ecombot::assistant::{ReplySource, SupportAssistant};
use ecombot::config::AssistantConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let question = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        bail!("Usage: ask <question>");
    }

    let config = AssistantConfig::from_env()?;
    let assistant = SupportAssistant::from_config(&config).await?;

    println!("Question: {question}");
    let route = route(&question);
    println!("Route: {route:?}");

    if route == Route::Answer {
        let faq = assistant
            .faq()
            .and_then(|faq| faq.lookup(&question, assistant.faq_threshold()));
        match &faq {
            Some(found) => println!(
                "FAQ match: {:?} ({} {:.1})",
                found.question, found.scorer, found.score
            ),
            None => println!("FAQ match: none"),
        }

        if faq.is_none() {
            // Retrieve once and generate from the documents shown.
            let chain = assistant.chain();
            let result = match chain.retrieve(&question).await {
                Ok(documents) => {
                    println!("Retrieved documents:");
                    for (rank, hit) in documents.iter().enumerate() {
                        println!(
                            "  {}. [{:?} {:.3}] {}",
                            rank + 1,
                            hit.document.metadata.source,
                            hit.score,
                            hit.document.page_content
                        );
                    }
                    chain.answer_from(&question, documents).await
                }
                Err(err) => {
                    println!("Retrieval failed: {err}");
                    Err(err)
                }
            };
            let reply = RagChain::with_fallback(result);
            let source = if reply.fell_back {
                ReplySource::Fallback
            } else {
                ReplySource::Knowledge
            };
            println!("Source: {}", source.as_str());
            println!("Answer: {}", reply.answer);
            return Ok(());
        }
    }

    let reply = assistant.answer(&question).await;
    println!("Source: {}", reply.source.as_str());
    println!("Answer: {}", reply.answer);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
