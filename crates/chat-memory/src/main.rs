// chat-memory/crates/chat-memory/src/main.rs

#[cfg(feature = "cli")]
mod cli {
    use anyhow::Context;
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;

    use chat_memory::{
        config::MemoryConfig, create_default_service, telemetry, ChatMemory, MemoryService, Message,
        MessageRole,
    };

    /// Local conversational memory: chats, summaries and cross-chat context
    #[derive(Parser, Debug)]
    #[command(author, version, about, long_about = None)]
    pub struct Args {
        /// Database file, overrides CHAT_MEMORY_DB_PATH
        #[arg(long)]
        pub db: Option<PathBuf>,

        /// Log the effective configuration before running
        #[arg(short, long, default_value_t = false)]
        pub verbose: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Subcommand, Debug)]
    pub enum Command {
        /// Start a chat titled from its first message
        New { text: String },
        /// Append a message, creating a chat when none is selected
        Add {
            #[arg(long)]
            chat: Option<String>,
            #[arg(long, default_value = "user")]
            role: MessageRole,
            text: String,
        },
        /// List all chats
        List,
        /// Print a chat with its messages
        Show { chat_id: String },
        Rename { chat_id: String, title: String },
        Delete { chat_id: String },
        /// Chats whose tags or key terms match the query
        Search { query: String },
        /// Snippets from other chats relevant to TEXT
        Context {
            #[arg(long)]
            chat: Option<String>,
            text: String,
        },
        /// Write a chat as JSON to stdout or a file
        Export {
            chat_id: String,
            #[arg(short, long)]
            output: Option<PathBuf>,
        },
        /// Import a chat exported earlier
        Import { path: PathBuf },
        Stats,
        /// Show, set or clear the assistant bio
        Bio {
            #[command(subcommand)]
            action: BioCommand,
        },
    }

    #[derive(Subcommand, Debug)]
    pub enum BioCommand {
        Show,
        Set { name: String, content: String },
        Clear,
    }

    pub async fn run() -> anyhow::Result<()> {
        telemetry::init_tracing();
        let args = Args::parse();

        let mut config = MemoryConfig::from_env()?;
        if let Some(db) = args.db {
            config.db_path = db;
        }
        if args.verbose {
            config.print_config();
        }

        let service = create_default_service(config)?;
        execute(&service, args.command).await
    }

    async fn execute(service: &MemoryService, command: Command) -> anyhow::Result<()> {
        match command {
            Command::New { text } => {
                let chat_id = service.create_new_chat(&text).await?;
                println!("{}", chat_id);
            }
            Command::Add { chat, role, text } => {
                if let Some(chat_id) = chat {
                    service.set_current_chat(&chat_id).await?;
                }
                let outcome = service.add_message(Message::new(role, text)).await?;
                if let Some(handle) = outcome.analysis {
                    // The process exits right after, so let the pass finish.
                    let report = handle.wait().await?;
                    tracing::debug!("Analysis {:?} for chat {}", report.outcome, report.chat_id);
                }
                println!("{} {}", outcome.chat_id, outcome.message.id);
            }
            Command::List => {
                for chat in service.list_chats()? {
                    println!(
                        "{}  {}  {} messages  [{}]",
                        chat.id,
                        chat.title,
                        chat.messages.len(),
                        join_tags(&chat)
                    );
                }
            }
            Command::Show { chat_id } => {
                let chat = service.load_chat(&chat_id).await?;
                print_chat(&chat);
            }
            Command::Rename { chat_id, title } => {
                service.rename_chat(&chat_id, &title).await?;
            }
            Command::Delete { chat_id } => {
                if !service.delete_chat(&chat_id).await? {
                    eprintln!("No chat with id {}", chat_id);
                }
            }
            Command::Search { query } => {
                for chat in service.search_chats(&query)? {
                    println!("{}  {}  [{}]", chat.id, chat.title, join_tags(&chat));
                }
            }
            Command::Context { chat, text } => {
                if let Some(chat_id) = chat {
                    service.set_current_chat(&chat_id).await?;
                }
                let snippets = service
                    .context_retriever()
                    .find_relevant_context(service.current_chat_id().await.as_deref(), &text)?;
                println!("{}", snippets.join("\n\n"));
            }
            Command::Export { chat_id, output } => {
                let exported = service.export_chat(&chat_id)?;
                match output {
                    Some(path) => std::fs::write(&path, exported)
                        .with_context(|| format!("Failed to write {}", path.display()))?,
                    None => println!("{}", exported),
                }
            }
            Command::Import { path } => {
                let serialized = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                println!("{}", service.import_chat(&serialized)?);
            }
            Command::Stats => {
                let stats = service.get_chat_stats()?;
                println!("Chats: {}", stats.total_chats);
                println!("Messages: {}", stats.total_messages);
                let db_stats = service.database().get_stats()?;
                println!("Bio: {}", if db_stats.has_bio { "set" } else { "not set" });
                println!("Database size: {} bytes", db_stats.database_size_bytes);
                for (tag, count) in stats.most_used_tags {
                    println!("  {:<24} {}", tag, count);
                }
            }
            Command::Bio { action } => match action {
                BioCommand::Show => match service.get_bio()? {
                    Some(bio) => println!("{}\n{}", bio.name, bio.content),
                    None => println!("No bio set"),
                },
                BioCommand::Set { name, content } => {
                    service.save_bio(&name, &content)?;
                }
                BioCommand::Clear => {
                    if !service.delete_bio()? {
                        println!("No bio set");
                    }
                }
            },
        }
        Ok(())
    }

    fn join_tags(chat: &ChatMemory) -> String {
        chat.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }

    fn print_chat(chat: &ChatMemory) {
        println!("# {}", chat.title);
        if !chat.summary.is_empty() {
            println!("Summary: {}", chat.summary);
        }
        if !chat.tags.is_empty() {
            println!("Tags: {}", join_tags(chat));
        }
        for message in &chat.messages {
            println!("\n[{}] {}", message.role, message.text());
        }
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
