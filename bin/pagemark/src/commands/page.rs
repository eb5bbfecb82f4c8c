use clap::Args;
use pagemark_core::{Config, Paths};
use pagemark_tools::browser::{
    CdpPageDriver, FixtureDriver, PageDriver, PageSession, RefError, SnapshotOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where the page comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Serve the page from a fixture JSON file (or a name under ~/.pagemark/fixtures)
    #[arg(long, value_name = "FILE", conflicts_with_all = ["port", "ws_url"])]
    pub fixture: Option<PathBuf>,

    /// Chrome remote debugging port (overrides browser.debugPort)
    #[arg(long)]
    pub port: Option<u16>,

    /// Page target WebSocket URL (overrides browser.wsUrl)
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,
}

impl SourceArgs {
    pub fn is_set(&self) -> bool {
        self.fixture.is_some() || self.port.is_some() || self.ws_url.is_some()
    }
}

/// Snapshot filter flags. Unset flags fall back to the config's snapshot section.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only interactive elements, flattened
    #[arg(short, long)]
    pub interactive: bool,

    /// Skip unnamed structural nodes and empty branches
    #[arg(short = 'c', long, conflicts_with = "no_compact")]
    pub compact: bool,

    /// Keep every structural node
    #[arg(long)]
    pub no_compact: bool,

    /// Also ref cursor:pointer / onclick / tabindex elements
    #[arg(short = 'C', long)]
    pub cursor: bool,

    /// Deepest tree level to include; the root is 0
    #[arg(short = 'd', long, value_name = "N")]
    pub depth: Option<usize>,

    /// CSS selector restricting the snapshot to a subtree
    #[arg(short, long, value_name = "SEL")]
    pub scope: Option<String>,
}

impl FilterArgs {
    pub fn apply(&self, mut options: SnapshotOptions) -> SnapshotOptions {
        if self.interactive {
            options.interactive = true;
        }
        if self.compact {
            options.compact = true;
        }
        if self.no_compact {
            options.compact = false;
        }
        if self.cursor {
            options.cursor = true;
        }
        if self.depth.is_some() {
            options.max_depth = self.depth;
        }
        options.scope = self.scope.clone();
        options
    }
}

/// A literal path if it exists, otherwise a saved fixture by name.
fn fixture_path(arg: &Path, paths: &Paths) -> PathBuf {
    if arg.exists() {
        arg.to_path_buf()
    } else {
        paths.fixture_file(&arg.to_string_lossy())
    }
}

pub async fn open_session(source: &SourceArgs, paths: &Paths, config: &Config) -> anyhow::Result<PageSession> {
    let driver: Arc<dyn PageDriver> = match &source.fixture {
        Some(arg) => {
            let path = fixture_path(arg, paths);
            debug!(path = %path.display(), "Loading fixture page");
            Arc::new(FixtureDriver::from_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load fixture {}: {}", path.display(), e)
            })?)
        }
        None => {
            let mut browser = config.browser.clone();
            if let Some(port) = source.port {
                browser.debug_port = port;
                browser.ws_url = None;
            }
            if let Some(ws_url) = &source.ws_url {
                browser.ws_url = Some(ws_url.clone());
            }
            Arc::new(CdpPageDriver::connect(&browser).await?)
        }
    };
    Ok(PageSession::new(driver).with_defaults(config.snapshot.clone()))
}

/// Report a ref error, as JSON on stdout when asked, and turn it into the
/// command's failure.
pub fn fail(err: RefError, json: bool) -> anyhow::Error {
    if json {
        println!("{}", err.to_json());
    }
    if err.suggests_resnapshot() {
        anyhow::anyhow!("{}\nRun `pagemark snapshot` to see the current refs.", err)
    } else {
        anyhow::anyhow!("{}", err)
    }
}
