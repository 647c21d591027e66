use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which dashboard a session is running. Decides the API base and the
/// sections on offer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Official,
    Resident,
}

impl Role {
    pub fn api_base(self) -> &'static str {
        match self {
            Role::Admin => "/api/admin",
            Role::Official => "/api/official",
            Role::Resident => "/api/resident",
        }
    }

    pub fn sections(self) -> &'static [Section] {
        use Section::*;
        match self {
            Role::Admin => &[
                Dashboard,
                Residents,
                Officials,
                Events,
                Announcements,
                Complaints,
                Users,
                Audit,
                Imports,
                Exports,
            ],
            Role::Official => &[
                Dashboard,
                Tasks,
                Complaints,
                Approvals,
                Events,
                Announcements,
                Residents,
                Reports,
            ],
            Role::Resident => &[
                Dashboard,
                Profile,
                Household,
                Documents,
                Complaints,
                Events,
                Announcements,
                Messages,
            ],
        }
    }

    pub fn offers(self, section: Section) -> bool {
        self.sections().contains(&section)
    }
}

/// A navigable dashboard region. Used as the poller registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Dashboard,
    Residents,
    Officials,
    Events,
    Announcements,
    Complaints,
    Users,
    Audit,
    Imports,
    Exports,
    Tasks,
    Approvals,
    Reports,
    Profile,
    Household,
    Documents,
    Messages,
}

impl Section {
    pub const ALL: [Section; 17] = [
        Section::Dashboard,
        Section::Residents,
        Section::Officials,
        Section::Events,
        Section::Announcements,
        Section::Complaints,
        Section::Users,
        Section::Audit,
        Section::Imports,
        Section::Exports,
        Section::Tasks,
        Section::Approvals,
        Section::Reports,
        Section::Profile,
        Section::Household,
        Section::Documents,
        Section::Messages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Section::Dashboard => "dashboard",
            Section::Residents => "residents",
            Section::Officials => "officials",
            Section::Events => "events",
            Section::Announcements => "announcements",
            Section::Complaints => "complaints",
            Section::Users => "users",
            Section::Audit => "audit",
            Section::Imports => "imports",
            Section::Exports => "exports",
            Section::Tasks => "tasks",
            Section::Approvals => "approvals",
            Section::Reports => "reports",
            Section::Profile => "profile",
            Section::Household => "household",
            Section::Documents => "documents",
            Section::Messages => "messages",
        }
    }

    /// Path segment of the section's query endpoint under the role's API base.
    pub fn path(self) -> &'static str {
        match self {
            Section::Audit => "audit-logs",
            other => other.name(),
        }
    }

    /// Key of the collection inside the section's response body.
    pub fn collection_key(self) -> &'static str {
        match self {
            Section::Audit => "logs",
            Section::Dashboard => "recentActivity",
            other => other.name(),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown section: {0}")]
pub struct UnknownSection(pub String);

impl FromStr for Section {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Section::ALL
            .into_iter()
            .find(|sec| sec.name() == wanted || sec.path() == wanted)
            .ok_or_else(|| UnknownSection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_names_and_paths() {
        assert_eq!("Residents".parse::<Section>(), Ok(Section::Residents));
        assert_eq!("audit-logs".parse::<Section>(), Ok(Section::Audit));
        assert!("lobby".parse::<Section>().is_err());
    }

    #[test]
    fn every_role_starts_with_dashboard() {
        for role in [Role::Admin, Role::Official, Role::Resident] {
            assert_eq!(role.sections().first(), Some(&Section::Dashboard));
        }
        assert!(Role::Admin.offers(Section::Imports));
        assert!(!Role::Resident.offers(Section::Users));
        assert!(Role::Official.offers(Section::Approvals));
    }
}
