use crate::output::{emit, or_dash};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum OrgSubcommand {
    /// Show the locally stored organization settings
    Show {
        #[arg(long)]
        org: String,
    },

    /// Set the user who receives escalations and dead-letter alerts
    SetAdmin {
        #[arg(long)]
        org: String,
        #[arg(long)]
        user: String,
    },

    /// Turn regulatory mode on or off for an organization or one project
    Regulatory {
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: Option<String>,
        /// Turn it off instead of on
        #[arg(long)]
        off: bool,
    },

    /// Replace the active roles list
    Roles {
        #[arg(long)]
        org: String,
        /// Comma-separated role names
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },
}

pub fn run(root: &Path, subcmd: OrgSubcommand, json: bool) -> anyhow::Result<()> {
    let gov = super::open(root)?;
    let org_id = match &subcmd {
        OrgSubcommand::Show { org }
        | OrgSubcommand::SetAdmin { org, .. }
        | OrgSubcommand::Regulatory { org, .. }
        | OrgSubcommand::Roles { org, .. } => org.clone(),
    };
    let mut settings = gov.store.org_settings(&org_id)?;

    let changed = !matches!(subcmd, OrgSubcommand::Show { .. });
    match subcmd {
        OrgSubcommand::Show { .. } => {}
        OrgSubcommand::SetAdmin { user, .. } => settings.admin_user_id = Some(user),
        OrgSubcommand::Regulatory { project, off, .. } => match project {
            Some(p) => {
                settings.regulatory_projects.retain(|x| x != &p);
                if !off {
                    settings.regulatory_projects.push(p);
                }
            }
            None => settings.regulatory_mode = !off,
        },
        OrgSubcommand::Roles { roles, .. } => settings.active_roles = roles,
    }
    if changed {
        gov.store.put_org_settings(&settings)?;
    }

    emit(json, &settings, |s| {
        println!("organization: {}", s.organization_id);
        println!("admin:        {}", or_dash(s.admin_user_id.as_deref()));
        println!("regulatory:   {}", if s.regulatory_mode { "on" } else { "off" });
        if !s.regulatory_projects.is_empty() {
            println!("regulated projects: {}", s.regulatory_projects.join(", "));
        }
        if !s.active_roles.is_empty() {
            println!("roles:        {}", s.active_roles.join(", "));
        }
    })
}
