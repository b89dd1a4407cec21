use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Table, presets};

use super::{print_json, print_warnings};
use crate::common::privileges;
use crate::store::{AccountStore, GroupOptions, GroupRecord, Kind, Record};
use crate::ui;

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// Create a new group
    Add {
        name: String,
        /// Specific gid instead of the next free one
        #[arg(long)]
        gid: Option<u32>,
        /// Comma-separated member names
        #[arg(long, value_delimiter = ',')]
        members: Vec<String>,
    },
    /// Delete a group
    Del { name: String },
    /// Change fields of an existing group
    Mod {
        name: String,
        /// New group name (keeps the gid)
        #[arg(long)]
        rename: Option<String>,
        /// Replace the member list (comma-separated)
        #[arg(long, value_delimiter = ',')]
        members: Option<Vec<String>>,
    },
    /// Disable the group password
    Lock { name: String },
    /// Re-enable the group password
    Unlock { name: String },
    /// Print one group, looked up by name or gid
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// List groups matching a glob pattern
    List {
        #[arg(default_value = "*")]
        pattern: String,
        #[arg(long)]
        json: bool,
    },
}

pub fn handle(command: &GroupCommand, store: &AccountStore, rerooted: bool) -> Result<()> {
    match command {
        GroupCommand::Add { name, gid, members } => {
            privileges::ensure_can_mutate(rerooted)?;
            let options = GroupOptions {
                gid: *gid,
                members: members.clone(),
            };
            let change = store.create_group(name, &options)?;
            print_warnings(&change.warnings);
            ui::success(&format!(
                "created group '{}' (gid {})",
                change.record.name, change.record.gid
            ));
            Ok(())
        }
        GroupCommand::Del { name } => {
            privileges::ensure_can_mutate(rerooted)?;
            let Some(record) = store.group_by_name(name)? else {
                ui::info(&format!("group '{name}' does not exist, nothing to do"));
                return Ok(());
            };
            store.delete(Kind::Group, record.gid)?;
            ui::success(&format!("deleted group '{name}'"));
            Ok(())
        }
        GroupCommand::Mod {
            name,
            rename,
            members,
        } => {
            privileges::ensure_can_mutate(rerooted)?;
            let Some(mut record) = store.group_by_name(name)? else {
                bail!("group '{name}' not found");
            };
            if let Some(new_name) = rename {
                record.name = new_name.clone();
            }
            if let Some(members) = members {
                record.members = members.clone();
                if let Some(gshadow) = record.gshadow.as_mut() {
                    gshadow.members = members.clone();
                }
            }
            store.modify_group(&record)?;
            ui::success(&format!("updated group '{}'", record.name));
            Ok(())
        }
        GroupCommand::Lock { name } => set_locked(store, rerooted, name, true),
        GroupCommand::Unlock { name } => set_locked(store, rerooted, name, false),
        GroupCommand::Show { name, json } => {
            let record = match store.group_by_name(name)? {
                Some(record) => record,
                None => {
                    let by_gid = match name.parse::<u32>() {
                        Ok(gid) => store.by_id(Kind::Group, gid)?,
                        Err(_) => None,
                    };
                    match by_gid {
                        Some(Record::Group(record)) => record,
                        _ => bail!("group '{name}' not found"),
                    }
                }
            };
            if *json {
                return print_json(&record);
            }
            show_group(&record);
            Ok(())
        }
        GroupCommand::List { pattern, json } => {
            let groups: Vec<GroupRecord> = store
                .enumerate(Kind::Group, pattern)?
                .into_iter()
                .filter_map(|record| match record {
                    Record::Group(group) => Some(group),
                    Record::User(_) => None,
                })
                .collect();
            if *json {
                return print_json(&groups);
            }
            let mut table = Table::new();
            table.load_preset(presets::NOTHING);
            table.set_header(vec!["NAME", "GID", "MEMBERS"]);
            for group in &groups {
                table.add_row(vec![
                    group.name.clone(),
                    group.gid.to_string(),
                    group.members.join(","),
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
    let Some(record) = store.group_by_name(name)? else {
        ui::info(&format!("group '{name}' does not exist, nothing to do"));
        return Ok(());
    };
    store.set_locked(Kind::Group, record.gid, locked)?;
    ui::success(&format!("{verb} group '{name}'"));
    Ok(())
}

fn show_group(record: &GroupRecord) {
    ui::info(&format!("name:    {}", record.name));
    ui::info(&format!("gid:     {}", record.gid));
    ui::info(&format!("members: {}", record.members.join(",")));
    if !record.admins().is_empty() {
        ui::info(&format!("admins:  {}", record.admins().join(",")));
    }
}
