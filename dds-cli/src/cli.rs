use clap::{ArgAction, Parser, Subcommand};
use dds_deliver::auth::Direction;
use dds_deliver::Credentials;
use std::path::PathBuf;

/// Deliver encrypted data to a project, or fetch it back.
#[derive(Parser, Debug)]
#[command(name = "dds", version, about = "Encrypted data delivery")]
pub struct Args {
    /// Delivery configuration file (JSON)
    #[arg(long, global = true, env = "DDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Credentials file (JSON with username, password, project, owner)
    #[arg(short = 'c', long, global = true)]
    pub credentials: Option<PathBuf>,

    /// User name; overrides the credentials file
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// Password; overrides the credentials file
    #[arg(long, global = true, env = "DDS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Project ID; overrides the credentials file
    #[arg(short, long, global = true)]
    pub project: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compress, encrypt and upload files or directories
    Put {
        /// Project owner the data is delivered to
        #[arg(short, long)]
        owner: Option<String>,

        /// File or directory to deliver (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<PathBuf>,

        /// File listing one path per line
        #[arg(long)]
        path_list: Option<PathBuf>,

        /// Cancel the rest of a directory when one of its files fails
        #[arg(long, action = ArgAction::Set)]
        break_on_fail: Option<bool>,

        /// Replace files that were already delivered
        #[arg(long)]
        overwrite: bool,
    },

    /// Download and decrypt project files
    Get {
        /// File or folder within the project (repeatable)
        #[arg(required_unless_present = "get_all", conflicts_with = "get_all")]
        paths: Vec<String>,

        /// Download every file in the project
        #[arg(short = 'a', long)]
        get_all: bool,

        /// Directory to write the files to
        #[arg(short, long, default_value = ".")]
        destination: PathBuf,

        /// Check each restored file against its registered checksum
        #[arg(long)]
        verify_checksum: bool,
    },

    /// List delivered files
    Ls {
        /// Only list files under this folder
        folder: Option<String>,
    },

    /// Remove delivered files
    Rm {
        /// File or folder within the project (repeatable)
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        paths: Vec<String>,

        /// Remove every file in the project
        #[arg(short, long)]
        all: bool,
    },
}

impl Command {
    pub fn direction(&self) -> Direction {
        match self {
            Command::Put { .. } => Direction::Put,
            Command::Get { .. } => Direction::Get,
            Command::Ls { .. } => Direction::List,
            Command::Rm { .. } => Direction::Remove,
        }
    }
}

impl Args {
    /// Credentials from the command line, completed from the file if given.
    pub fn credentials(&self) -> dds_deliver::DeliveryResult<Credentials> {
        let owner = match &self.command {
            Command::Put { owner, .. } => owner.clone(),
            _ => None,
        };
        let explicit = Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            project: self.project.clone(),
            owner,
        };
        match &self.credentials {
            Some(path) => Ok(explicit.or(Credentials::from_file(path)?)),
            None => Ok(explicit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn put_arguments() {
        let args = Args::parse_from([
            "dds", "-u", "facility", "-p", "proj", "put", "-o", "researcher", "-s", "a.txt",
            "-s", "dir", "--break-on-fail", "false", "--overwrite",
        ]);
        let Command::Put {
            sources,
            break_on_fail,
            overwrite,
            ..
        } = &args.command
        else {
            panic!("expected put");
        };
        assert_eq!(sources, &vec![PathBuf::from("a.txt"), PathBuf::from("dir")]);
        assert_eq!(*break_on_fail, Some(false));
        assert!(*overwrite);

        let credentials = args.credentials().unwrap();
        assert_eq!(credentials.owner.as_deref(), Some("researcher"));
        assert_eq!(args.command.direction(), Direction::Put);
    }

    #[test]
    fn get_requires_a_path() {
        assert!(Args::try_parse_from(["dds", "get"]).is_err());
        let args = Args::parse_from(["dds", "get", "batch", "-d", "/tmp/out"]);
        assert_eq!(args.command.direction(), Direction::Get);
    }

    #[test]
    fn get_all_with_checksum_verification() {
        let args = Args::parse_from(["dds", "get", "--get-all", "--verify-checksum"]);
        let Command::Get {
            paths,
            get_all,
            verify_checksum,
            ..
        } = &args.command
        else {
            panic!("expected get");
        };
        assert!(paths.is_empty());
        assert!(*get_all);
        assert!(*verify_checksum);
        assert!(Args::try_parse_from(["dds", "get", "batch", "--get-all"]).is_err());
    }

    #[test]
    fn rm_takes_paths_or_all() {
        assert!(Args::try_parse_from(["dds", "rm"]).is_err());
        assert!(Args::try_parse_from(["dds", "rm", "a.txt", "--all"]).is_err());
        let args = Args::parse_from(["dds", "rm", "--all"]);
        assert!(matches!(args.command, Command::Rm { all: true, .. }));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
