use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Table, presets};

use super::{print_json, print_warnings};
use crate::common::privileges;
use crate::store::{AccountStore, Kind, Record, UserOptions, UserRecord};
use crate::ui;

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Create a new user account
    Add {
        name: String,
        /// Specific uid instead of the next free one
        #[arg(long)]
        uid: Option<u32>,
        /// Primary group id
        #[arg(long)]
        gid: Option<u32>,
        /// Home directory path
        #[arg(long)]
        home: Option<String>,
        /// Login shell
        #[arg(long)]
        shell: Option<String>,
        /// GECOS / comment field
        #[arg(short, long)]
        comment: Option<String>,
        /// Do not create the home directory
        #[arg(long)]
        no_create_home: bool,
        /// Do not create the mail spool
        #[arg(long)]
        no_create_mail: bool,
    },
    /// Delete a user account
    Del {
        name: String,
        /// Also remove the home directory
        #[arg(long)]
        remove_home: bool,
        /// Also remove the mail spool
        #[arg(long)]
        remove_mail: bool,
    },
    /// Change fields of an existing account
    Mod {
        name: String,
        /// New account name (keeps the uid)
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        home: Option<String>,
        #[arg(long)]
        shell: Option<String>,
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Disable the account password
    Lock { name: String },
    /// Re-enable the account password
    Unlock { name: String },
    /// Print one account, looked up by name or uid
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// List accounts matching a glob pattern
    List {
        #[arg(default_value = "*")]
        pattern: String,
        #[arg(long)]
        json: bool,
    },
}

pub fn handle(command: &UserCommand, store: &AccountStore, rerooted: bool) -> Result<()> {
    match command {
        UserCommand::Add {
            name,
            uid,
            gid,
            home,
            shell,
            comment,
            no_create_home,
            no_create_mail,
        } => {
            privileges::ensure_can_mutate(rerooted)?;
            let options = UserOptions {
                uid: *uid,
                gid: *gid,
                home: home.clone(),
                shell: shell.clone(),
                comment: comment.clone(),
                create_home: !no_create_home,
                create_mail: !no_create_mail,
            };
            let change = store.create_user(name, &options)?;
            print_warnings(&change.warnings);
            ui::success(&format!(
                "created user '{}' (uid {}, home {})",
                change.record.name, change.record.uid, change.record.home
            ));
            Ok(())
        }
        UserCommand::Del {
            name,
            remove_home,
            remove_mail,
        } => {
            privileges::ensure_can_mutate(rerooted)?;
            let Some(record) = store.user_by_name(name)? else {
                ui::info(&format!("user '{name}' does not exist, nothing to do"));
                return Ok(());
            };
            store.delete(Kind::User, record.uid)?;
            if *remove_home {
                store
                    .remove_home_for(&record)
                    .with_context(|| format!("removing home of '{name}'"))?;
            }
            if *remove_mail {
                store
                    .remove_mail_for(&record)
                    .with_context(|| format!("removing mail spool of '{name}'"))?;
            }
            ui::success(&format!("deleted user '{name}'"));
            Ok(())
        }
        UserCommand::Mod {
            name,
            rename,
            home,
            shell,
            comment,
        } => {
            privileges::ensure_can_mutate(rerooted)?;
            let Some(mut record) = store.user_by_name(name)? else {
                bail!("user '{name}' not found");
            };
            if let Some(new_name) = rename {
                record.name = new_name.clone();
            }
            if let Some(home) = home {
                record.home = home.clone();
            }
            if let Some(shell) = shell {
                record.shell = shell.clone();
            }
            if let Some(comment) = comment {
                record.gecos = comment.clone();
            }
            let warnings = store.modify_user(&record)?;
            print_warnings(&warnings);
            ui::success(&format!("updated user '{}'", record.name));
            Ok(())
        }
        UserCommand::Lock { name } => set_locked(store, rerooted, name, true),
        UserCommand::Unlock { name } => set_locked(store, rerooted, name, false),
        UserCommand::Show { name, json } => {
            let record = match store.user_by_name(name)? {
                Some(record) => record,
                None => {
                    let by_uid = match name.parse::<u32>() {
                        Ok(uid) => store.by_id(Kind::User, uid)?,
                        Err(_) => None,
                    };
                    match by_uid {
                        Some(Record::User(record)) => record,
                        _ => bail!("user '{name}' not found"),
                    }
                }
            };
            if *json {
                return print_json(&record);
            }
            show_user(&record, store);
            Ok(())
        }
        UserCommand::List { pattern, json } => {
            let users: Vec<UserRecord> = store
                .enumerate(Kind::User, pattern)?
                .into_iter()
                .filter_map(|record| match record {
                    Record::User(user) => Some(user),
                    Record::Group(_) => None,
                })
                .collect();
            if *json {
                return print_json(&users);
            }
            let mut table = Table::new();
            table.load_preset(presets::NOTHING);
            table.set_header(vec!["NAME", "UID", "GID", "HOME", "SHELL"]);
            for user in &users {
                table.add_row(vec![
                    user.name.clone(),
                    user.uid.to_string(),
                    user.gid.to_string(),
                    user.home.clone(),
                    user.shell.clone(),
                ]);
            }
            ui::info(&table.to_string());
            Ok(())
        }
    }
}

fn set_locked(store: &AccountStore, rerooted: bool, name: &str, locked: bool) -> Result<()> {
    let verb = if locked { "locked" } else { "unlocked" };
    privileges::ensure_can_mutate(rerooted)?;
    let Some(record) = store.user_by_name(name)? else {
        ui::info(&format!("user '{name}' does not exist, nothing to do"));
        return Ok(());
    };
    store.set_locked(Kind::User, record.uid, locked)?;
    ui::success(&format!("{verb} user '{name}'"));
    Ok(())
}

fn show_user(record: &UserRecord, store: &AccountStore) {
    ui::info(&format!("name:    {}", record.name));
    ui::info(&format!("uid:     {}", record.uid));
    ui::info(&format!("gid:     {}", record.gid));
    ui::info(&format!("gecos:   {}", record.gecos));
    let home_note = if store.has_home(record) { "" } else { " (missing)" };
    ui::info(&format!("home:    {}{home_note}", record.home));
    ui::info(&format!("shell:   {}", record.shell));
    ui::info(&format!(
        "locked:  {}",
        if record.is_locked() { "yes" } else { "no" }
    ));
}
