use anyhow::{Context, Result};
use chrono::Utc;
use console::style;
use dialoguer::Input;
use tracing::{error, info};

use crate::app::AppContext;
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::index::{IndexManifest, LockInfo, is_populated, lock_path, reset_index};
use crate::rag::{Answer, AnswerStatus, ConversationMemory};

/// Words that end an interactive chat
const EXIT_WORDS: [&str; 3] = ["quit", "exit", "q"];

/// Load the existing index or build it from the document folder
#[inline]
pub async fn build_or_load_index(config: Config, rebuild: bool) -> Result<()> {
    if rebuild && reset_index(config.index_path())? {
        eprintln!(
            "{}",
            style(format!(
                "Cleared index and unfinished builds at {}",
                config.index_path().display()
            ))
            .yellow()
        );
    }

    let app = AppContext::initialize(config)
        .await
        .context("Failed to prepare the index")?;

    eprintln!(
        "{} {} chunks indexed at {}",
        style("✓").green(),
        style(app.index_len()).cyan(),
        style(app.config().index_path().display()).cyan()
    );
    Ok(())
}

/// Answer one question and print it to stdout
#[inline]
pub async fn ask_question(config: Config, question: &str) -> Result<()> {
    let app = AppContext::initialize(config).await?;
    let answer = app.engine().answer(question).await?;
    print_answer(&answer);
    Ok(())
}

/// Interactive question loop with conversation memory
#[inline]
pub async fn run_chat(config: Config) -> Result<()> {
    let app = AppContext::initialize(config).await?;
    let mut memory = ConversationMemory::new();

    info!("Starting chat session");
    eprintln!();
    eprintln!(
        "{}",
        style("💬 Ready! Type 'quit' to exit.").bold().cyan()
    );

    loop {
        eprintln!();
        let line = match Input::<String>::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()
        {
            Ok(line) => line,
            Err(e) => {
                // Ctrl-C or a closed terminal
                info!("Chat input ended: {}", e);
                break;
            }
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_word(question) {
            break;
        }

        match app.engine().answer_with_history(question, &mut memory).await {
            Ok(answer) => print_answer(&answer),
            Err(e) => {
                error!("Error processing question: {}", e);
                eprintln!("{} {}", style("⚠ Error:").red(), e);
            }
        }
    }

    eprintln!("{}", style("Goodbye! 👋").cyan());
    info!("Chat session ended after {} turns", memory.len());
    Ok(())
}

/// Print the index manifest, model health and configuration summary
#[inline]
pub fn show_status(config: &Config) -> Result<()> {
    println!("📊 Docs-RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🔍 Index:");
    let location = config.index_path();
    if is_populated(location) {
        match IndexManifest::read(location) {
            Ok(manifest) => {
                println!("   ✅ Location: {}", location.display());
                println!("   🗄️  Backend: {}", manifest.backend);
                println!("   📦 Chunks: {}", manifest.chunk_count);
                println!("   📋 Embedding model: {}", manifest.embedding_model);
                println!("   🔢 Dimension: {}", manifest.dimension);
                println!(
                    "   ✂️  Chunking: {} chars, {} overlap",
                    manifest.chunking.chunk_size, manifest.chunking.chunk_overlap
                );
                println!("   🕒 Built: {}", manifest.created_at.to_rfc3339());
                if manifest.embedding_model != config.ollama.embedding_model {
                    println!(
                        "   ⚠️  Configured embedding model is {}; run `index --rebuild`",
                        config.ollama.embedding_model
                    );
                }
            }
            Err(e) => println!("   ❌ Unreadable index at {}: {}", location.display(), e),
        }
    } else {
        println!("   💤 No index at {} yet", location.display());
    }
    match LockInfo::read(location) {
        Ok(Some(lock)) if lock.is_stale(Utc::now()) => println!(
            "   ⚠️  Abandoned build lock {} (pid {}); the next build reclaims it",
            lock_path(location).display(),
            lock.pid
        ),
        Ok(Some(lock)) => println!(
            "   🔒 A build holds {} (pid {}, heartbeat {})",
            lock_path(location).display(),
            lock.pid,
            lock.heartbeat.to_rfc3339()
        ),
        Ok(None) => {}
        Err(e) => println!("   ❌ Unreadable build lock: {}", e),
    }

    println!();
    println!("🤖 Ollama Status:");
    let client = OllamaClient::new(&config.ollama).context("Invalid Ollama configuration")?;
    match client.health_check() {
        Ok(()) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
            println!("   📋 Embedding model: {}", config.ollama.embedding_model);
            println!("   📋 Generation model: {}", config.ollama.generation_model);
        }
        Err(e) => println!("   ⚠️  Ollama: Unavailable - {:#}", e),
    }

    println!();
    println!("📂 Documents: {}", config.docs_folder().display());
    println!("🎯 Retrieval k: {}", config.retrieval.k);

    Ok(())
}

fn is_exit_word(input: &str) -> bool {
    EXIT_WORDS
        .iter()
        .any(|word| input.eq_ignore_ascii_case(word))
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if answer.status == AnswerStatus::Fallback {
        info!("Question was redirected to the fallback contact");
    } else if !answer.sources.is_empty() {
        eprintln!(
            "{}",
            style(format!("Sources: {}", answer.sources.join(", "))).dim()
        );
    }
}
