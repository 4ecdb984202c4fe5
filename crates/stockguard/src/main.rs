// Stockguard
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockguard::rbac::{AccessLogFilter, GateOutcome};
use stockguard::{Access, Config, RbacSystem, RequestContext, Requirement};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stockguard: inspect and exercise the RBAC core
#[derive(Parser, Debug)]
#[command(name = "stockguard", version, about)]
pub struct Cli {
    /// Audit journal file (overrides $STOCKGUARD_JOURNAL_PATH)
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// State snapshot file (overrides $STOCKGUARD_STATE_PATH)
    #[arg(long)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the default roles, permissions and administrator
    Seed,

    /// Log in and report the effective permissions
    Login { username: String, password: String },

    /// Log in and check a single resource/action pair through the gate
    Check {
        username: String,
        password: String,
        resource: String,
        action: String,
    },

    /// List roles with their permissions
    Roles,

    /// List every permission
    Permissions,

    /// Show the access log, newest first
    Logs {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,

        /// Only entries made by this username
        #[arg(long)]
        user: Option<String>,
    },

    /// Summarise the access log
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if cli.journal.is_some() {
        config.journal_path = cli.journal;
    }
    if cli.state.is_some() {
        config.state_path = cli.state;
    }

    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let system = RbacSystem::open(config).await.context("Failed to open RBAC system")?;
    let ctx = RequestContext::anonymous().with_client_ip("127.0.0.1").with_user_agent(concat!("stockguard-cli/", env!("CARGO_PKG_VERSION")));

    match cli.command {
        Commands::Seed => {
            let report = system.seed_defaults().await?;
            println!(
                "permissions created: {}, roles created: {}, grants added: {}, admin created: {}",
                report.permissions_created, report.roles_created, report.grants_added, report.admin_created
            );
        }
        Commands::Login { username, password } => {
            let user = system.authenticate(&username, &password, &ctx).await?;
            println!("Logged in as {} (id {})", user.username, user.id);
            for effective in system.permissions_for_user(user.id).await {
                println!("  {:<24} via {}", effective.permission.key(), effective.granting_role);
            }
            system.logout(&RequestContext::for_user(user.id)).await?;
        }
        Commands::Check { username, password, resource, action } => {
            let user = system.authenticate(&username, &password, &ctx).await?;
            let session = RequestContext::for_user(user.id).with_client_ip("127.0.0.1");
            let access = match action.as_str() {
                "create" => Access::create(resource.clone()),
                "update" => Access::update(resource.clone()),
                "delete" => Access::delete(resource.clone()),
                _ => Access::view(resource.clone()),
            };

            match system.guard(&session, &Requirement::permission(&resource, &action), &access).await? {
                GateOutcome::Allowed(_) => println!("ALLOWED {}:{} for {}", resource, action, user.username),
                GateOutcome::Forbidden { reason } => println!("FORBIDDEN {}:{} for {}: {}", resource, action, user.username, reason),
            }
        }
        Commands::Roles => {
            for role in system.list_roles().await {
                let keys: Vec<String> = system.permissions_of_role(role.id).await.iter().map(|p| p.key()).collect();
                println!("{:<10} {}", role.name, keys.join(", "));
            }
        }
        Commands::Permissions => {
            for permission in system.list_permissions().await {
                println!("{:<6} {:<24} {}", permission.id.0, permission.key(), permission.name);
            }
        }
        Commands::Logs { page, page_size, user } => {
            let filter = match user {
                Some(username) => {
                    let Some(user) = system.list_users().await.into_iter().find(|u| u.username == username) else {
                        bail!("Unknown user '{}'", username);
                    };
                    AccessLogFilter::for_actor(user.id)
                }
                None => AccessLogFilter::default(),
            };

            let logs = system.query_access_logs(&filter, page, page_size).await;
            for entry in &logs.items {
                let actor = entry.actor.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
                let outcome = if entry.success { "ok" } else { "FAILED" };
                println!(
                    "{} {:>5} {:<6} {:<6} {:<10} {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.id.0,
                    actor,
                    outcome,
                    entry.resource,
                    entry.action,
                    entry.detail.as_deref().unwrap_or("")
                );
            }
            println!("page {} of {} ({} entries)", logs.page, logs.total_pages(), logs.total);
        }
        Commands::Stats => {
            let stats = system.audit_statistics().await;
            println!("total: {}, success: {}, failed: {}", stats.total_entries, stats.successful_entries, stats.failed_entries);
            for (resource, count) in &stats.entries_by_resource {
                println!("  {:<12} {}", resource, count);
            }
        }
    }

    info!("Done");
    Ok(())
}
