use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use issue_templates::auth::TemplateAction;
use issue_templates::config::Config;
use issue_templates::domain::{GlobalTemplate, Project, Template, Tracker, User};
use issue_templates::error::Result;
use issue_templates::logging::init_logging;
use issue_templates::server::start_server;
use issue_templates::storage::{InMemoryStorage, Storage};

#[derive(Parser)]
#[command(name = "issue_templates")]
#[command(about = "Issue description template service")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port override; defaults to the config file value
        #[arg(long)]
        port: Option<u16>,
        /// Populate the in-memory store with a demo hierarchy
        #[arg(long)]
        seed_demo: bool,
    },
}

/// Seeds a small project tree with a few templates so the server is
/// explorable out of the box. Logs the ids needed to issue requests.
async fn seed_demo_data(storage: &InMemoryStorage) -> Result<()> {
    let bug = Tracker {
        id: Uuid::new_v4(),
        name: "Bug".to_string(),
        position: 0,
    };
    let feature = Tracker {
        id: Uuid::new_v4(),
        name: "Feature".to_string(),
        position: 1,
    };
    storage.insert_tracker(bug.clone());
    storage.insert_tracker(feature.clone());

    let platform = Project {
        id: Uuid::new_v4(),
        name: "Platform".to_string(),
        identifier: "platform".to_string(),
        parent_id: None,
        tracker_ids: vec![bug.id, feature.id],
    };
    let backend = Project {
        id: Uuid::new_v4(),
        name: "Backend".to_string(),
        identifier: "backend".to_string(),
        parent_id: Some(platform.id),
        tracker_ids: vec![bug.id, feature.id],
    };
    storage.insert_project(platform.clone());
    storage.insert_project(backend.clone());

    let admin = User {
        id: Uuid::new_v4(),
        login: "admin".to_string(),
        admin: true,
    };
    let reporter = User {
        id: Uuid::new_v4(),
        login: "reporter".to_string(),
        admin: false,
    };
    storage.insert_user(admin.clone());
    storage.insert_user(reporter.clone());
    storage.grant(reporter.id, backend.id, TemplateAction::ViewTemplates);

    let now = Utc::now();
    let mut shared_bug = Template {
        id: None,
        project_id: platform.id,
        tracker_id: Some(bug.id),
        title: "Bug report".to_string(),
        description: "## Steps to reproduce\n\n## Expected\n\n## Actual\n".to_string(),
        note: Some("Shared with subprojects".to_string()),
        position: 0,
        is_default: true,
        enabled: true,
        enabled_sharing: true,
        author_id: Some(admin.id),
        created_at: now,
        updated_at: now,
    };
    storage.create_template(&mut shared_bug).await?;

    let mut backend_feature = Template {
        id: None,
        project_id: backend.id,
        tracker_id: Some(feature.id),
        title: "Feature request".to_string(),
        description: "## Problem\n\n## Proposal\n".to_string(),
        note: None,
        position: 0,
        is_default: false,
        enabled: true,
        enabled_sharing: false,
        author_id: Some(admin.id),
        created_at: now,
        updated_at: now,
    };
    storage.create_template(&mut backend_feature).await?;

    let mut security = GlobalTemplate {
        id: None,
        tracker_id: None,
        title: "Security disclosure".to_string(),
        description: "Report privately before filing.".to_string(),
        note: None,
        position: 0,
        enabled: true,
        project_ids: vec![platform.id, backend.id],
        author_id: Some(admin.id),
        created_at: now,
    };
    storage.insert_global_template(&mut security);

    info!("Seeded demo data");
    println!("Demo data seeded:");
    println!("  admin user:    {}", admin.id);
    println!("  reporter user: {}", reporter.id);
    println!("  project Platform: {}", platform.id);
    println!("  project Backend:  {}", backend.id);
    println!("  tracker Bug:      {}", bug.id);
    println!("  tracker Feature:  {}", feature.id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load_or_default()?;

    match cli.command {
        Commands::Serve { port, seed_demo } => {
            let storage = Arc::new(InMemoryStorage::new());
            if seed_demo {
                seed_demo_data(&storage).await?;
            }
            let port = port.unwrap_or(config.server.port);
            start_server(storage.clone(), storage, port).await?;
        }
    }

    Ok(())
}
