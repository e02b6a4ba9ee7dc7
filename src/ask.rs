//! Question answering from the command line.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::pipeline::QaPipeline;

/// Answer `question` against the indexed collection and print the reply.
pub async fn run_ask(config: &Config, question: &str, model: Option<String>) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Question must not be empty.");
    }

    let model = match model.or_else(|| config.llm.default_model.clone()) {
        Some(m) => m,
        None => bail!("No model given. Pass --model or set llm.default_model in config."),
    };

    let pipeline = QaPipeline::from_config(config).await?;
    let answer = pipeline.answer(question.trim(), &model).await?;
    println!("{}", answer);
    Ok(())
}

pub async fn run_models(config: &Config) -> Result<()> {
    let pipeline = QaPipeline::from_config(config).await?;
    let models = pipeline.list_models().await?;

    if models.is_empty() {
        println!("No local models detected.");
        return Ok(());
    }

    let default = config.llm.default_model.as_deref();
    for name in models {
        let marker = if Some(name.as_str()) == default { " (default)" } else { "" };
        println!("{}{}", name, marker);
    }
    Ok(())
}
