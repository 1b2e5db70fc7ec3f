use clap::{Args, Parser, Subcommand};
use macnotes::convert::BodyFormat;
use std::path::PathBuf;

/// Returns the version string, including the git hash for non-release builds.
/// Format: "0.4.0" for releases, "0.4.0@abc1234" for dev builds
fn get_version() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const IS_RELEASE: &str = env!("IS_RELEASE");

    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();

    VERSION_STRING.get_or_init(|| {
        if IS_RELEASE == "true" || GIT_HASH.is_empty() {
            VERSION.to_string()
        } else {
            format!("{}@{}", VERSION, GIT_HASH)
        }
    })
}

#[derive(Parser, Debug)]
#[command(name = "notes", bin_name = "notes", version = get_version())]
#[command(about = "Work with Apple Notes on the command line", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug output
    #[arg(long, global = true, hide = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print information about Notes accounts
    #[command(display_order = 1)]
    Accounts {
        /// Print output in JSON format
        #[arg(short, long)]
        json: bool,
    },

    /// Add a new note
    #[command(display_order = 2)]
    Add(AddArgs),

    /// List notes, optionally filtering by account or text
    #[command(alias = "ls", display_order = 3)]
    List {
        /// Only notes whose name or body contains TEXT
        #[arg(value_name = "TEXT")]
        text: Option<String>,

        /// Limit results to ACCOUNT; may be repeated
        #[arg(short, long = "account", value_name = "ACCOUNT")]
        accounts: Vec<String>,
    },

    /// Print notes with the given name
    #[command(display_order = 4)]
    Cat {
        #[arg(value_name = "NOTE_NAME")]
        name: String,

        /// Output the note as plain text
        #[arg(short, long, conflicts_with = "html")]
        plaintext: bool,

        /// Output the note as HTML
        #[arg(short = 'H', long)]
        html: bool,

        /// Output notes as JSON; the body is HTML unless --plaintext is given
        #[arg(short, long)]
        json: bool,
    },

    /// Show or change default settings for `notes add`
    #[command(display_order = 5)]
    Config(ConfigArgs),

    /// Dump all notes, or the selected ones, for debugging
    #[command(display_order = 6)]
    Dump {
        /// Dump only the notes selected in Notes
        #[arg(short, long)]
        selected: bool,

        /// Do not dump note bodies
        #[arg(short = 'B', long)]
        no_body: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct AddArgs {
    /// Note text: the first line is the name, the rest the body. `-` reads stdin
    #[arg(value_name = "NOTE")]
    pub note: Option<String>,

    /// Show the note in Notes after adding it
    #[arg(short, long)]
    pub show: bool,

    /// Read the note text from FILE
    #[arg(short = 'F', long, value_name = "FILE", conflicts_with = "url")]
    pub file: Option<PathBuf>,

    /// Download URL and store a readable version of it
    #[arg(short, long, value_name = "URL")]
    pub url: Option<String>,

    /// The body is HTML
    #[arg(short = 'H', long, group = "format")]
    pub html: bool,

    /// The body is Markdown
    #[arg(short, long, group = "format")]
    pub markdown: bool,

    /// The body is plain text (default unless changed with `notes config`)
    #[arg(short, long, group = "format")]
    pub plaintext: bool,

    /// Edit the note text in the editor before adding it
    #[arg(short, long)]
    pub edit: bool,

    /// Add the note to ACCOUNT
    #[arg(short, long, value_name = "ACCOUNT")]
    pub account: Option<String>,

    /// Add the note to top-level FOLDER
    #[arg(short, long, value_name = "FOLDER")]
    pub folder: Option<String>,
}

impl AddArgs {
    /// Format chosen on the command line, if any.
    pub fn format(&self) -> Option<BodyFormat> {
        if self.html {
            Some(BodyFormat::Html)
        } else if self.markdown {
            Some(BodyFormat::Markdown)
        } else if self.plaintext {
            Some(BodyFormat::Plaintext)
        } else {
            None
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Default account for new notes
    #[arg(long, value_name = "ACCOUNT")]
    pub account: Option<String>,

    /// Default folder for new notes
    #[arg(long, value_name = "FOLDER")]
    pub folder: Option<String>,

    /// Default body format
    #[arg(long, value_enum)]
    pub format: Option<BodyFormat>,

    /// Editor command, or `$VAR` to read it from an environment variable
    #[arg(long, value_name = "EDITOR")]
    pub editor: Option<String>,
}

impl ConfigArgs {
    pub fn is_empty(&self) -> bool {
        self.account.is_none()
            && self.folder.is_none()
            && self.format.is_none()
            && self.editor.is_none()
    }
}
