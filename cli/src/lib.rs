//! Local image database command line tool
//!
//! Files are listed in a JSON config (see [config::Config]) together with their sources and tags.  Whenever the
//! config is edited, each file's content is hashed into a content store and symlinked into directories named after
//! its tags (see [linkfile]), with the hashes recorded in a lockfile (see [lockfile::Lockfile]) next to the config.
//! Files may then be selected using the query language provided by [images_shared::search].

#![deny(warnings)]

use {
    anyhow::{Context, Result},
    config::{Config, FileInfo},
    diff::format_file_diff,
    images_shared::{
        search::{self, Expr},
        Action, ConfigTag, TagEdit,
    },
    lockfile::Lockfile,
    std::path::{Path, PathBuf},
    structopt::StructOpt,
    tracing::{debug, info, warn},
};

pub mod config;
pub mod diff;
pub mod linkfile;
pub mod lockfile;

/// Name of the lockfile, which lives in the same directory as the config
pub const LOCKFILE_NAME: &str = "lockfile.json";

#[derive(StructOpt, Debug)]
#[structopt(name = "images", about = "Local image database")]
pub struct Options {
    /// Path to the images config file.  Useful for using the images command from anywhere.
    #[structopt(
        long,
        env = "IMAGES_CONFIG_FILE",
        default_value = "./images.config.json",
        global = true
    )]
    pub config_file: PathBuf,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(StructOpt, Debug)]
pub struct EditOptions {
    /// Output the file diff as JSON
    #[structopt(long)]
    pub json: bool,

    /// Leave the filesystem untouched (sources are still read)
    #[structopt(long)]
    pub dry: bool,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Add a new file to the database
    Add {
        #[structopt(flatten)]
        options: EditOptions,

        /// Local path or file:// URI of the file
        uri: String,

        /// Tags to attach to the file, e.g. +animal +name:fido
        #[structopt(required = true, allow_hyphen_values = true)]
        tags: Vec<TagEdit>,
    },

    /// Remove files matching a query from the database
    Remove {
        #[structopt(flatten)]
        options: EditOptions,

        /// Search query, e.g. +animal -name:fido
        #[structopt(required = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },

    /// Add tags to or remove tags from the files matching a query
    Tag {
        #[structopt(flatten)]
        options: EditOptions,

        /// Search query, e.g. "+animal [~dog ~cat]"
        #[structopt(allow_hyphen_values = true)]
        query: String,

        /// Tags to add (+path:value) or remove (-path:value)
        #[structopt(required = true, allow_hyphen_values = true)]
        tags: Vec<TagEdit>,
    },

    /// Search for files with specific tags
    Search {
        /// Search query, e.g. +animal [~dog ~cat] -name:fido
        #[structopt(required = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },

    /// Regenerate the lockfile and links from the config
    Sync {
        #[structopt(flatten)]
        options: EditOptions,
    },
}

/// Quote any `path:value` argument whose value contains whitespace, e.g. `name:bree bree` becomes
/// `name:"bree bree"`, so that the arguments may be joined into a single query string.
pub fn fix_search_input(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|arg| match arg.split_once(':') {
            Some((path, value)) if value.contains(char::is_whitespace) && !value.starts_with('"') => {
                format!("{path}:\"{value}\"")
            }
            _ => arg.clone(),
        })
        .collect()
}

/// Parse a query given as a sequence of command line arguments, each holding a single expression.
pub fn parse_query(args: &[String]) -> Result<Vec<Expr>> {
    parse_query_string(&fix_search_input(args).join(" "))
}

/// Parse a query given as a single command line argument, which is used as is.
pub fn parse_query_string(query: &str) -> Result<Vec<Expr>> {
    debug!("parsing query {query:?}");

    search::parse(query).with_context(|| format!("invalid query: {query}"))
}

/// Generate an ID for a new file from the current time, skipping any already in use.
fn new_id(config: &Config) -> String {
    let mut millis = chrono::Utc::now().timestamp_millis();

    while config.files.contains_key(&millis.to_string()) {
        millis += 1;
    }

    millis.to_string()
}

/// The config and lockfile along with where they live
struct Workspace {
    config: Config,
    lockfile: Lockfile,
    config_path: PathBuf,
    lockfile_path: PathBuf,
    output_path: PathBuf,
}

impl Workspace {
    async fn open(config_path: &Path) -> Result<Self> {
        let output_path = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
            _ => PathBuf::from("."),
        };

        let lockfile_path = output_path.join(LOCKFILE_NAME);

        Ok(Self {
            config: Config::load(config_path).await?,
            lockfile: Lockfile::load(&lockfile_path).await?,
            config_path: config_path.to_owned(),
            lockfile_path,
            output_path,
        })
    }

    /// Apply `edits` to the config, report the resulting changes to the output directory, and, unless this is a dry
    /// run, make those changes and save the new config and lockfile.
    async fn edit(
        &self,
        options: &EditOptions,
        edits: impl FnOnce(&mut Config) -> Result<()>,
    ) -> Result<()> {
        let edit = self
            .config
            .edit(edits, &self.lockfile, &self.output_path, options.dry)
            .await?;

        let diff = edit.diff();

        if options.json {
            println!("{}", serde_json::to_string(&diff)?);
        } else if !diff.is_empty() {
            println!("{}", format_file_diff(&diff));
        }

        if options.dry {
            info!("dry run: leaving {} untouched", self.output_path.display());
        } else {
            linkfile::write_links(&diff, &self.output_path).await?;
            edit.config.save(&self.config_path).await?;
            edit.lockfile.save(&self.lockfile_path).await?;
        }

        Ok(())
    }
}

/// Run the command specified by `options`.
pub async fn run(options: Options) -> Result<()> {
    let workspace = Workspace::open(&options.config_file).await?;

    match options.command {
        Command::Add { options, uri, tags } => {
            let id = new_id(&workspace.config);

            let tags = tags
                .into_iter()
                .filter_map(|edit| match edit.action {
                    Action::Add => Some(ConfigTag::from(&edit.tag)),
                    Action::Remove => {
                        warn!("ignoring {edit}: a new file has no tags to remove");
                        None
                    }
                })
                .collect();

            info!("adding {uri} as {id}");

            workspace
                .edit(&options, |config| {
                    config.files.insert(id, FileInfo { source: uri, tags });

                    Ok(())
                })
                .await
        }

        Command::Remove { options, query } => {
            let query = parse_query(&query)?;

            workspace
                .edit(&options, |config| {
                    let before = config.files.len();

                    config
                        .files
                        .retain(|_, file| !search::matches(&file.candidate_tags(), &query));

                    info!("removing {} files", before - config.files.len());

                    Ok(())
                })
                .await
        }

        Command::Tag {
            options,
            query,
            tags,
        } => {
            let query = parse_query_string(&query)?;

            workspace
                .edit(&options, |config| {
                    for (id, file) in &mut config.files {
                        if search::matches(&file.candidate_tags(), &query) {
                            debug!("editing tags of {id}");

                            for edit in &tags {
                                file.apply(edit);
                            }
                        }
                    }

                    Ok(())
                })
                .await
        }

        Command::Search { query } => {
            let query = parse_query(&query)?;

            println!(
                "{}",
                serde_json::to_string_pretty(&workspace.config.search(&query))?
            );

            Ok(())
        }

        Command::Sync { options } => workspace.edit(&options, |_| Ok(())).await,
    }
}
