//! Command dispatcher.
//!
//! Splits an input line shell-style, validates the arguments, turns site
//! ordinals into [`SiteId`]s and pipeline expressions into wire blocks, and
//! forwards the result to the runtime ports. A failing command never ends the
//! session; its error is printed and the loop continues.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use pipeline::{
    compile, AddressError, BlockId, BranchCreate, BranchName, BranchService, CompileError,
    DatabaseName, DiagnosticKind, DiagnosticSeverity, FileUuid, KeyPrefix, MetadataService,
    ObjectAddress, ObjectStore, ServiceError, SiteEndpoint, SiteId, SiteRole, SiteValidator,
    MAX_STAGES,
};

/// Why a command line could not be executed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid arguments. Usage: {usage}")]
    Usage { usage: &'static str },

    #[error("Invalid {what} '{value}'")]
    BadValue { what: &'static str, value: String },

    #[error("Unterminated quote or trailing escape in command line")]
    UnterminatedQuote,

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("You have to enable branch feeder mode.")]
    FeederModeRequired,

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Result of one successfully executed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Text to print; may be empty.
    Output(String),
    /// Leave the loop.
    Quit,
}

/// The set of collaborators commands are forwarded to.
pub struct Shell {
    branches: Arc<dyn BranchService>,
    metadata: Arc<dyn MetadataService>,
    objects: Arc<dyn ObjectStore>,
    validator: Box<dyn SiteValidator>,
    use_branch: bool,
}

impl Shell {
    pub fn new(
        branches: Arc<dyn BranchService>,
        metadata: Arc<dyn MetadataService>,
        objects: Arc<dyn ObjectStore>,
        validator: Box<dyn SiteValidator>,
        use_branch: bool,
    ) -> Self {
        Self {
            branches,
            metadata,
            objects,
            validator,
            use_branch,
        }
    }

    /// Executes one input line.
    pub async fn execute(&self, line: &str) -> Result<Outcome, CommandError> {
        let words = shell_words::split(line).map_err(|_| CommandError::UnterminatedQuote)?;
        let Some((name, args)) = words.split_first() else {
            return Ok(Outcome::Output(String::new()));
        };
        debug!(command = %name, args = args.len(), "dispatching");

        let output = match name.as_str() {
            "quit" | "exit" | "EOF" => return Ok(Outcome::Quit),
            "cbranch" | "bc" => self.create_branch(args).await?,
            "bp" => self.publish(args).await?,
            "getbor" => self.dump_bor(args).await?,
            "search" => self.search(args).await?,
            "getcluster" => self.cluster_status(args).await?,
            "getactivesite" => self.active_sites(args).await?,
            "getactivesitesize" => self.active_site_count(args).await?,
            "offline" => self.offline(args).await?,
            "online" => self.online(args).await?,
            "addsite" => self.add_site(args).await?,
            "rmvsite" => self.remove_site(args).await?,
            "shutdown" => self.shutdown(args).await?,
            "statfs" => self.statfs(args).await?,
            "queryobj" => self.query_object(args).await?,
            "writeobj" => self.write_object(args).await?,
            "readobj" => self.read_object(args).await?,
            "delobj" => self.delete_object(args).await?,
            "truncobj" => self.truncate_object(args).await?,
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(Outcome::Output(output))
    }

    // -----------------------------------------------------------------------
    // Addressing helpers
    // -----------------------------------------------------------------------

    /// Encodes a (role, ordinal) pair after running it through the validator.
    fn site(&self, role: SiteRole, ordinal: &str) -> Result<SiteId, CommandError> {
        let ordinal: u64 = number("ordinal", ordinal)?;
        self.validator.check(role.code(), ordinal)?;
        Ok(SiteId::new(role, ordinal))
    }

    /// Accepts an already-packed site identifier.
    fn raw_site(&self, text: &str) -> Result<SiteId, CommandError> {
        let raw: u64 = number("site id", text)?;
        let role = u8::try_from(raw >> pipeline::addressing::ROLE_SHIFT).unwrap_or(u8::MAX);
        let ordinal = raw & u64::from(pipeline::addressing::ORDINAL_MASK);
        self.validator.check(role, ordinal)?;
        Ok(SiteId::from_raw(raw))
    }

    fn object(&self, file: &str, block: &str, osd: &str) -> Result<ObjectAddress, CommandError> {
        Ok(ObjectAddress {
            file: FileUuid::new(number("file uuid", file)?),
            block: BlockId::new(number("block id", block)?),
            site: self.site(SiteRole::ObjectStorage, osd)?,
        })
    }

    // -----------------------------------------------------------------------
    // Branch commands
    // -----------------------------------------------------------------------

    async fn create_branch(&self, args: &[String]) -> Result<String, CommandError> {
        const USAGE: &str = "cbranch branch_name tag level [\"op,op,...\"]";
        need(args, 3, USAGE)?;
        let name = branch_name(&args[0])?;
        let level: u8 = number("level", &args[2])?;

        let mut lines = Vec::new();
        let pipeline = if args.len() > 3 {
            let compiled = compile(&args[3..].join(" "))?;
            for diagnostic in &compiled.diagnostics {
                lines.push(match (diagnostic.kind, diagnostic.severity()) {
                    (DiagnosticKind::CapacityExceeded, _) => {
                        format!("At most {MAX_STAGES} valid operators, ignore others!")
                    }
                    (_, DiagnosticSeverity::Warning) => {
                        format!("Using defaults for OP: {diagnostic}")
                    }
                    (_, DiagnosticSeverity::Error) => format!("Ignore this OP: {diagnostic}"),
                });
            }
            Some(compiled.container.to_wire_blob())
        } else {
            None
        };

        let started = Instant::now();
        self.branches
            .create_branch(BranchCreate {
                name,
                tag: args[1].clone(),
                level,
                pipeline,
            })
            .await?;
        lines.push(elapsed(started));
        Ok(lines.join("\n"))
    }

    async fn publish(&self, args: &[String]) -> Result<String, CommandError> {
        if !self.use_branch {
            return Err(CommandError::FeederModeRequired);
        }
        need(args, 4, "bp branch_name tag level DATA_STRING")?;
        let name = branch_name(&args[0])?;
        let level: u8 = number("level", &args[2])?;

        let started = Instant::now();
        self.branches
            .publish(&name, &args[1], level, args[3].as_bytes())
            .await?;
        Ok(elapsed(started))
    }

    async fn dump_bor(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 2, "getbor branch_name bpsite")?;
        let name = branch_name(&args[0])?;
        let site = self.site(SiteRole::BranchPublisher, &args[1])?;

        let started = Instant::now();
        let bor = self.branches.dump_bor(&name, site).await?;
        Ok(format!("{bor}\n{}", elapsed(started)))
    }

    async fn search(&self, args: &[String]) -> Result<String, CommandError> {
        const USAGE: &str = "search branch_name bpsite|all dbname prefix EXPR";
        need(args, 5, USAGE)?;
        let name = branch_name(&args[0])?;
        let database = DatabaseName::new(args[2].as_str()).ok_or(CommandError::Usage { usage: USAGE })?;
        let prefix = KeyPrefix::new(args[3].as_str()).ok_or(CommandError::Usage { usage: USAGE })?;
        let expression = args[4..].join(" ");

        let sites = if args[1] == "all" {
            let count = self
                .metadata
                .active_site_count(SiteRole::BranchPublisher)
                .await?;
            (0..count)
                .map(|i| SiteId::new(SiteRole::BranchPublisher, u64::from(i)))
                .collect()
        } else {
            vec![self.site(SiteRole::BranchPublisher, &args[1])?]
        };

        let started = Instant::now();
        let mut lines = Vec::new();
        for site in sites {
            match self
                .branches
                .search(&name, site, &database, &prefix, &expression)
                .await
            {
                Ok(hits) => lines.extend(hits),
                // Sites without a matching index are skipped.
                Err(ServiceError::InvalidArgument(reason)) if args[1] == "all" => {
                    debug!(%site, %reason, "search skipped site");
                }
                Err(e) => return Err(e.into()),
            }
        }
        lines.push(elapsed(started));
        Ok(lines.join("\n"))
    }

    // -----------------------------------------------------------------------
    // Cluster commands
    // -----------------------------------------------------------------------

    async fn cluster_status(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 1, "getcluster mds|mdsl|bp|...")?;
        let role = parse_role(&args[0])?;
        let status = self.metadata.cluster_status(role).await?;
        Ok(format!("{status}\n+OK"))
    }

    async fn active_sites(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 1, "getactivesite mds|mdsl|bp|...")?;
        let role = parse_role(&args[0])?;
        let sites = self.metadata.active_sites(role).await?;
        Ok(sites
            .iter()
            .map(SiteId::to_string)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn active_site_count(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 1, "getactivesitesize mds|mdsl|osd|r2|bp")?;
        let role = parse_role(&args[0])?;
        let count = self.metadata.active_site_count(role).await?;
        Ok(format!("Active {role} sites: {count}"))
    }

    async fn offline(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 2, "offline mds|mdsl id [force]")?;
        let site = self.site(parse_role(&args[0])?, &args[1])?;
        let force = match args.get(2) {
            Some(flag) => number::<i64>("force flag", flag)? != 0,
            None => false,
        };

        let started = Instant::now();
        self.metadata.offline(site, force).await?;
        Ok(format!("{}\n+OK", elapsed(started)))
    }

    async fn online(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 2, "online mds|mdsl id")?;
        let site = self.site(parse_role(&args[0])?, &args[1])?;

        let started = Instant::now();
        self.metadata.online(site).await?;
        Ok(format!("{}\n+OK", elapsed(started)))
    }

    async fn add_site(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 4, "addsite ip port type id")?;
        let endpoint = endpoint(&args[0], &args[1])?;
        let site = self.site(parse_role(&args[2])?, &args[3])?;

        let started = Instant::now();
        self.metadata.add_site(endpoint, site).await?;
        Ok(elapsed(started))
    }

    async fn remove_site(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 3, "rmvsite ip port site_id")?;
        let endpoint = endpoint(&args[0], &args[1])?;
        let site = self.raw_site(&args[2])?;

        let started = Instant::now();
        self.metadata.remove_site(endpoint, site).await?;
        Ok(elapsed(started))
    }

    async fn shutdown(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 1, "shutdown site_id")?;
        let site = self.raw_site(&args[0])?;

        let started = Instant::now();
        self.metadata.shutdown(site).await?;
        Ok(elapsed(started))
    }

    async fn statfs(&self, _args: &[String]) -> Result<String, CommandError> {
        let started = Instant::now();
        let stats = self.metadata.statfs().await?;
        Ok(format!("{stats}\n{}", elapsed(started)))
    }

    // -----------------------------------------------------------------------
    // Object commands
    // -----------------------------------------------------------------------

    async fn query_object(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 2, "queryobj file_uuid file_blockid")?;
        let file = FileUuid::new(number("file uuid", &args[0])?);
        let block = BlockId::new(number("block id", &args[1])?);

        let started = Instant::now();
        let sites = self.objects.query(file, block).await?;
        let mut lines: Vec<String> = sites.iter().map(SiteId::to_string).collect();
        lines.push(elapsed(started));
        lines.push("+OK".to_string());
        Ok(lines.join("\n"))
    }

    async fn write_object(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 5, "writeobj file_uuid file_blockid OSD#i string offset")?;
        let object = self.object(&args[0], &args[1], &args[2])?;
        let offset: u64 = number("offset", &args[4])?;

        self.objects
            .write(object, offset, args[3].as_bytes())
            .await?;
        Ok("+OK".to_string())
    }

    async fn read_object(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 5, "readobj file_uuid file_blockid OSD#i length offset")?;
        let object = self.object(&args[0], &args[1], &args[2])?;
        let length: u64 = number("length", &args[3])?;
        let offset: u64 = number("offset", &args[4])?;

        let data = self.objects.read(object, offset, length).await?;
        Ok(format!("{}\n+OK", String::from_utf8_lossy(&data)))
    }

    async fn delete_object(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 3, "delobj file_uuid file_blockid OSD#i")?;
        let object = self.object(&args[0], &args[1], &args[2])?;

        self.objects.delete(object).await?;
        Ok("+OK".to_string())
    }

    async fn truncate_object(&self, args: &[String]) -> Result<String, CommandError> {
        need(args, 4, "truncobj file_uuid file_blockid OSD#i length")?;
        let object = self.object(&args[0], &args[1], &args[2])?;
        let length: u64 = number("length", &args[3])?;

        self.objects.truncate(object, length).await?;
        Ok("+OK".to_string())
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn need(args: &[String], count: usize, usage: &'static str) -> Result<(), CommandError> {
    if args.len() < count {
        return Err(CommandError::Usage { usage });
    }
    Ok(())
}

fn number<T: FromStr>(what: &'static str, value: &str) -> Result<T, CommandError> {
    value.parse().map_err(|_| CommandError::BadValue {
        what,
        value: value.to_string(),
    })
}

fn branch_name(value: &str) -> Result<BranchName, CommandError> {
    BranchName::new(value).ok_or_else(|| CommandError::BadValue {
        what: "branch name",
        value: value.to_string(),
    })
}

fn parse_role(value: &str) -> Result<SiteRole, CommandError> {
    Ok(value.parse::<SiteRole>()?)
}

fn endpoint(host: &str, port: &str) -> Result<SiteEndpoint, CommandError> {
    Ok(SiteEndpoint {
        host: host.to_string(),
        port: number("port", port)?,
    })
}

fn elapsed(started: Instant) -> String {
    format!("Time elapsed: {:.6}s", started.elapsed().as_secs_f64())
}
