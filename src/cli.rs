use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserArgs {
    /// Create a user record and print a token for it
    Add {
        /// Mail address; also the owner identity of the user's items
        #[clap(long)]
        mail: String,

        /// Display name shared with owners of matching items
        #[clap(long)]
        name: String,

        /// Phone number shared with owners of matching items
        #[clap(long)]
        phone: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP service.
    Serve {},

    /// Manage user records
    User {
        #[clap(subcommand)]
        action: UserArgs,
    },

    /// Issue a fresh token for an existing user
    Token {
        #[clap(long)]
        mail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_add() {
        let args = Args::try_parse_from([
            "reclaim", "user", "add", "--mail", "a@x", "--name", "Ann", "--phone", "+100",
        ])
        .unwrap();

        match args.command {
            Command::User {
                action: UserArgs::Add { mail, name, phone },
            } => {
                assert_eq!(mail, "a@x");
                assert_eq!(name, "Ann");
                assert_eq!(phone, "+100");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_token_requires_mail() {
        assert!(Args::try_parse_from(["reclaim", "token"]).is_err());
    }
}
