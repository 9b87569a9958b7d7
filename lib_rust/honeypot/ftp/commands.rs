// FTP Command Parsing
// Parses control-channel lines into typed commands (RFC 959 subset)

use thiserror::Error;

/// Why a control line could not become a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("Command \"{0}\" not understood.")]
    Unknown(String),
    #[error("{0} requires an argument")]
    MissingArgument(&'static str),
    #[error("Invalid {0} argument")]
    InvalidArgument(&'static str),
}

impl ParseError {
    /// Reply sent to the client for this error
    pub fn reply(&self) -> String {
        match self {
            ParseError::Empty => "500 Command \"\" not understood.".to_string(),
            ParseError::Unknown(_) => format!("500 {}", self),
            ParseError::MissingArgument(_) => "501 Syntax error: command needs an argument.".to_string(),
            ParseError::InvalidArgument(_) => format!("501 {}.", self),
        }
    }
}

/// FTP Commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
    // Authentication
    User(String),
    Pass(String),
    Quit,

    // Navigation
    Pwd,
    Cwd(String),
    Cdup,

    // Listing
    List(Option<String>),
    Nlst(Option<String>),
    Stat(Option<String>),

    // Transfers
    Retr(String),
    Stor(String),
    Appe(String),
    Stou,

    // Mutations
    Dele(String),
    Rnfr(String),
    Rnto(String),
    Mkd(String),
    Rmd(String),

    // Data connection
    Pasv,
    Port(String),
    Type(String),
    Mode(String),
    Stru(String),

    // System
    Syst,
    Noop,
    Help(Option<String>),
    Feat,
    Opts(String, String),
    Size(String),
    Mdtm(String),
    Rest(u64),
    Abor,
    Allo,
    Clnt(String),
}

/// Split a raw line into its upper-cased verb and optional argument
pub fn split_line(input: &str) -> (String, Option<String>) {
    let input = input.trim_end_matches(&['\r', '\n'][..]).trim_start();
    let mut parts = input.splitn(2, ' ');
    let verb = parts.next().unwrap_or_default().to_uppercase();
    let arg = parts
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    (verb, arg)
}

impl FtpCommand {
    /// Parse an FTP command from a control line
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let (cmd, args) = split_line(input);
        if cmd.is_empty() {
            return Err(ParseError::Empty);
        }

        let required = |name: &'static str| args.clone().ok_or(ParseError::MissingArgument(name));

        let command = match cmd.as_str() {
            "USER" => FtpCommand::User(required("USER")?),
            // Empty passwords are legal (anonymous clients send them)
            "PASS" => FtpCommand::Pass(args.clone().unwrap_or_default()),
            "QUIT" => FtpCommand::Quit,

            "PWD" | "XPWD" => FtpCommand::Pwd,
            "CWD" | "XCWD" => FtpCommand::Cwd(args.clone().unwrap_or_else(|| "/".to_string())),
            "CDUP" | "XCUP" => FtpCommand::Cdup,

            "LIST" => FtpCommand::List(args.clone()),
            "NLST" => FtpCommand::Nlst(args.clone()),
            "STAT" => FtpCommand::Stat(args.clone()),

            "RETR" => FtpCommand::Retr(required("RETR")?),
            "STOR" => FtpCommand::Stor(required("STOR")?),
            "APPE" => FtpCommand::Appe(required("APPE")?),
            "STOU" => FtpCommand::Stou,

            "DELE" => FtpCommand::Dele(required("DELE")?),
            "RNFR" => FtpCommand::Rnfr(required("RNFR")?),
            "RNTO" => FtpCommand::Rnto(required("RNTO")?),
            "MKD" | "XMKD" => FtpCommand::Mkd(required("MKD")?),
            "RMD" | "XRMD" => FtpCommand::Rmd(required("RMD")?),

            "PASV" => FtpCommand::Pasv,
            "PORT" => FtpCommand::Port(required("PORT")?),
            "TYPE" => FtpCommand::Type(required("TYPE")?),
            "MODE" => FtpCommand::Mode(required("MODE")?),
            "STRU" => FtpCommand::Stru(required("STRU")?),

            "SYST" => FtpCommand::Syst,
            "NOOP" => FtpCommand::Noop,
            "HELP" => FtpCommand::Help(args.clone()),
            "FEAT" => FtpCommand::Feat,
            "OPTS" => {
                let opts = required("OPTS")?;
                let mut opt_parts = opts.splitn(2, ' ');
                let option = opt_parts.next().unwrap_or_default().to_uppercase();
                let value = opt_parts.next().unwrap_or("").to_string();
                FtpCommand::Opts(option, value)
            }
            "SIZE" => FtpCommand::Size(required("SIZE")?),
            "MDTM" => FtpCommand::Mdtm(required("MDTM")?),
            "REST" => {
                let offset = required("REST")?
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidArgument("REST"))?;
                FtpCommand::Rest(offset)
            }
            "ABOR" => FtpCommand::Abor,
            "ALLO" => FtpCommand::Allo,
            "CLNT" => FtpCommand::Clnt(required("CLNT")?),

            _ => return Err(ParseError::Unknown(cmd)),
        };

        Ok(command)
    }

    /// Commands answered before a successful login
    pub fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            FtpCommand::User(_)
                | FtpCommand::Pass(_)
                | FtpCommand::Quit
                | FtpCommand::Syst
                | FtpCommand::Feat
                | FtpCommand::Noop
                | FtpCommand::Help(_)
        )
    }

    /// Attempts to move or change file contents
    pub fn touches_files(&self) -> bool {
        matches!(
            self,
            FtpCommand::Retr(_)
                | FtpCommand::Stor(_)
                | FtpCommand::Appe(_)
                | FtpCommand::Stou
                | FtpCommand::Dele(_)
                | FtpCommand::Rnfr(_)
                | FtpCommand::Rnto(_)
                | FtpCommand::Mkd(_)
                | FtpCommand::Rmd(_)
        )
    }
}
