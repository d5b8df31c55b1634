//! Tutorbot CLI entry point: a REPL over the tutoring service.

use anyhow::Context as _;
use clap::Parser;
use indoc::indoc;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use tutorbot::catalog::Catalog;
use tutorbot::credentials::{CredentialStore, FileSecretStore, ProviderId};
use tutorbot::service::{ServiceOptions, TutorService};
use tutorbot::{Capability, TurnRole};

/// Built-in demo catalog used when no catalog file is supplied.
const SAMPLE_CATALOG: &str = indoc! {r#"
    [
      {
        "id": "math",
        "name": "数学",
        "chapters": [
          {
            "id": "math-sets",
            "name": "集合",
            "concepts": [
              {
                "id": "set-basics",
                "title": "集合的基本概念",
                "content": "集合是数学中最基本的概念之一。把一些确定的、不同的对象放在一起形成的整体就是集合。集合有确定性、互异性、无序性三个特性。我们通常用大写字母表示集合，用小写字母表示元素，a∈A表示a是集合A的元素。",
                "difficulty": "basic",
                "tags": ["集合"]
              },
              {
                "id": "set-notation",
                "title": "集合的表示方法",
                "content": "集合主要有列举法和描述法两种表示方法。列举法把元素一一列举在大括号内，例如A = {1, 2, 3}；描述法用元素的共同特征来表示集合，例如B = {x | x是小于10的正整数}。",
                "difficulty": "basic",
                "tags": ["集合"]
              },
              {
                "id": "set-relations",
                "title": "集合间的关系",
                "content": "集合之间主要有子集、真子集和相等三种关系。若A的每一个元素都属于B，则A是B的子集，记作A⊆B；若A⊆B且A≠B，则A是B的真子集。",
                "difficulty": "intermediate",
                "tags": ["集合"]
              }
            ]
          },
          {
            "id": "math-functions",
            "name": "函数",
            "concepts": [
              {
                "id": "fn-concept",
                "title": "函数的概念",
                "content": "函数描述两个数集之间的一种对应关系：对于数集A中的每一个元素x，数集B中都有唯一确定的元素y与之对应，记作y = f(x)。",
                "difficulty": "intermediate",
                "tags": ["函数"]
              }
            ]
          }
        ]
      }
    ]
"#};

#[derive(Parser)]
#[command(name = "tutorbot")]
#[command(about = "AI tutoring assistant with provider fallback")]
struct Cli {
    /// Path to a catalog JSON file (optional)
    #[arg(short, long)]
    catalog: Option<std::path::PathBuf>,

    /// Ask a single question and exit
    #[arg(short, long)]
    question: Option<String>,

    /// Select a concept by id before asking
    #[arg(long)]
    concept: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = tutorbot::config::Config::load().context("failed to load configuration")?;

    let catalog_json = match cli.catalog.or(config.catalog_path.clone()) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read catalog: {}", path.display()))?,
        None => SAMPLE_CATALOG.to_string(),
    };
    let catalog = Arc::new(Catalog::from_json(&catalog_json).context("failed to load catalog")?);

    let secrets = Arc::new(FileSecretStore::open(config.secrets_path.clone()));
    let credentials = Arc::new(CredentialStore::from_env(secrets));
    let service = Arc::new(TutorService::from_config(
        catalog,
        credentials,
        &ServiceOptions {
            diagnostics: config.diagnostics,
            deepseek_base_url: config.deepseek_base_url.clone(),
        },
    ));

    if let Some(concept) = cli.concept {
        service.set_current_concept(Some(concept));
    }

    if !service.has_capability(Capability::Text) {
        eprintln!("（未配置文本API密钥，运行在演示模式。用 /key deepseek <密钥> 配置。）");
    }

    if let Some(question) = cli.question {
        service.handle_user_message(question, vec![]).await;
        print_latest_reply(&service);
        return Ok(());
    }

    repl(service).await
}

async fn repl(service: Arc<TutorService>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all("tutorbot — 输入问题，/help 查看命令\n".as_bytes())
        .await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["/quit" | "/exit"] => break,
            ["/help"] => {
                println!(
                    "/concept <id>   选择知识点\n\
                     /key <provider> <密钥>   保存API密钥 (deepseek/openai/gemini/claude)\n\
                     /keys           查看已配置密钥\n\
                     /clear          清空会话\n\
                     /quit           退出"
                );
            }
            ["/clear"] => {
                service.clear_conversation();
                println!("会话已清空。");
            }
            ["/concept", id] => {
                service.set_current_concept(Some(id.to_string()));
                let context = service.current_context();
                match &context.concept {
                    Some(concept) => println!("当前知识点：{}（{}）", concept.title, concept.difficulty),
                    None => println!("未找到该知识点，将以通用模式回答。"),
                }
            }
            ["/key", provider, secret] => match parse_provider(provider) {
                Some(provider) => {
                    service.save_credential(provider, secret);
                    println!("已保存 {provider} 密钥。");
                }
                None => println!("未知的提供商：{provider}"),
            },
            ["/keys"] => {
                for provider in ProviderId::ALL {
                    match service.masked_credential(provider) {
                        Some(masked) => println!("{provider}: {masked}"),
                        None => println!("{provider}: 未配置"),
                    }
                }
            }
            _ => {
                service.handle_user_message(line.to_string(), vec![]).await;
                print_latest_reply(&service);
            }
        }
    }

    Ok(())
}

fn parse_provider(name: &str) -> Option<ProviderId> {
    match name {
        "deepseek" => Some(ProviderId::DeepSeek),
        "openai" => Some(ProviderId::OpenAi),
        "gemini" => Some(ProviderId::Gemini),
        "claude" => Some(ProviderId::Claude),
        _ => None,
    }
}

fn print_latest_reply(service: &TutorService) {
    let Some(session) = service.conversation() else {
        return;
    };
    if let Some(turn) = session
        .turns
        .iter()
        .rev()
        .find(|t| t.role == TurnRole::Assistant)
    {
        println!("\n{}\n", turn.content);
    }
    if let Some(error) = service.last_error() {
        tracing::debug!(%error, "last dispatch error");
    }
}
