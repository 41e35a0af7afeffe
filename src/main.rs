use std::path::{Path, PathBuf};

use chrono::DateTime;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use minigram::app::App;
use minigram::cache::{Destination, Request};
use minigram::config::Config;
use minigram::db::{Post, User};

#[derive(Parser, Debug)]
#[command(name = "minigram")]
#[command(about = "An offline-first photo journal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/minigram/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage posts
  Post {
    #[command(subcommand)]
    action: PostCommand,
  },
  /// Manage users
  User {
    #[command(subcommand)]
    action: UserCommand,
  },
  /// Manage the cached application shell
  Shell {
    #[command(subcommand)]
    action: ShellCommand,
  },
  /// Fetch a path through the offline router
  Fetch {
    /// Path relative to the origin, e.g. ./index.html
    path: String,
    /// Treat the request as a document navigation
    #[arg(long)]
    navigate: bool,
    /// Request destination (style, script, image, document, font, manifest)
    #[arg(long)]
    destination: Option<Destination>,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,
    /// Accept header, e.g. image/webp
    #[arg(long)]
    accept: Option<String>,
    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
}

#[derive(Subcommand, Debug)]
enum PostCommand {
  /// Publish an image file
  Add {
    image: PathBuf,
    #[arg(long)]
    caption: Option<String>,
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
  },
  /// List posts, newest first
  List,
  /// Like a post
  Like { id: String },
  /// Delete a post
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
  /// Register a user with an already hashed password
  Add {
    username: String,
    /// SHA-256 of the password, lowercase hex
    #[arg(long)]
    password_hash: String,
  },
  /// Show a user
  Show { username: String },
}

#[derive(Subcommand, Debug)]
enum ShellCommand {
  /// Fetch the manifest into the current bucket
  Install,
  /// Delete buckets from previous versions
  Activate,
  /// Show buckets and cached keys
  Status,
}

/// Log to a file under the data directory; RUST_LOG controls the level.
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(log_dir, "minigram.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config.data_dir()?)?;
  let settle_budget = config.fetch_timeout();

  let app = App::new(config).await?;

  match args.command {
    Command::Post { action } => run_post(&app, action).await,
    Command::User { action } => run_user(&app, action).await,
    Command::Shell { action } => run_shell(&app, action).await,
    Command::Fetch {
      path,
      navigate,
      destination,
      method,
      accept,
      output,
    } => {
      let mut request = if navigate {
        Request::navigate(&path)
      } else {
        Request::get(&path)
      };
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }
      if let Some(accept) = accept {
        request = request.with_accept(accept);
      }
      request = request.with_method(&method);

      let routed = app.fetch(&request).await;
      println!(
        "{} {} ({}, {} bytes)",
        routed.response.status,
        request.key,
        routed.source,
        routed.response.body.len()
      );
      if let Some(content_type) = routed.response.content_type() {
        println!("content-type: {}", content_type);
      }
      if let Some(output) = output {
        std::fs::write(&output, &routed.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", output.display(), e))?;
      }
      app.settle(settle_budget).await;
      Ok(())
    }
  }
}

async fn run_post(app: &App, action: PostCommand) -> Result<()> {
  let store = app.store();
  match action {
    PostCommand::Add {
      image,
      caption,
      lat,
      lon,
    } => {
      let geo = lat.zip(lon);
      let post = app.publish(&image, caption, geo).await?;
      println!("published {}", post.id);
    }
    PostCommand::List => {
      let posts = store.get_all_posts().await?;
      if posts.is_empty() {
        println!("no posts yet");
      }
      for post in &posts {
        println!("{}", format_post(post));
      }
    }
    PostCommand::Like { id } => {
      let post = store.like_post(&id).await?;
      println!("{} now has {} likes", post.id, post.likes);
    }
    PostCommand::Delete { id } => {
      store.delete_post(&id).await?;
      println!("deleted {}", id);
    }
  }
  Ok(())
}

async fn run_user(app: &App, action: UserCommand) -> Result<()> {
  let store = app.store();
  match action {
    UserCommand::Add {
      username,
      password_hash,
    } => {
      store
        .add_user(User {
          username: username.clone(),
          password_hash,
        })
        .await?;
      println!("added user {}", username);
    }
    UserCommand::Show { username } => match store.get_user(&username).await? {
      Some(user) => println!("{} {}", user.username, user.password_hash),
      None => println!("no user named {}", username),
    },
  }
  Ok(())
}

async fn run_shell(app: &App, action: ShellCommand) -> Result<()> {
  let shell = app.shell();
  match action {
    ShellCommand::Install => {
      let stored = shell.install().await?;
      println!("installed {} assets into {}", stored, shell.version());
    }
    ShellCommand::Activate => {
      let deleted = shell.activate()?;
      if deleted.is_empty() {
        println!("{} active; nothing to purge", shell.version());
      } else {
        println!("{} active; purged {}", shell.version(), deleted.join(", "));
      }
    }
    ShellCommand::Status => {
      for bucket in shell.buckets()? {
        let marker = if bucket == shell.version() { "*" } else { " " };
        println!("{} {}", marker, bucket);
      }
      let cached = shell.cached_keys()?;
      let missing: Vec<String> = shell
        .manifest()
        .into_iter()
        .filter(|key| !cached.contains(key))
        .collect();
      println!("{} keys cached, {} manifest entries missing", cached.len(), missing.len());
      for key in missing {
        println!("  missing {}", key);
      }
    }
  }
  Ok(())
}

fn format_post(post: &Post) -> String {
  let when = DateTime::from_timestamp_millis(post.ts)
    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
    .unwrap_or_else(|| post.ts.to_string());
  let mut line = format!("{}  {}  likes:{}", post.id, when, post.likes);
  if let Some(caption) = &post.caption {
    line.push_str(&format!("  {}", caption));
  }
  if let Some(geo) = &post.geo {
    line.push_str(&format!("  @{:.4},{:.4}", geo.lat, geo.lon));
  }
  line
}
