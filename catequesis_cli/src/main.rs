use catequesis_core::reporting::ReportRows;
use catequesis_core::*;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "catequesis")]
#[command(about = "Parish catechesis enrollment and progression", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the built-in catalog to the data directory
    Init,

    /// Manage parishes
    #[command(subcommand)]
    Parish(ParishCommand),

    /// Manage catechetical levels
    #[command(subcommand)]
    Level(LevelCommand),

    /// Manage periods
    #[command(subcommand)]
    Period(PeriodCommand),

    /// Register a catechumen; prints the new id
    Register {
        #[arg(long)]
        name: String,

        /// Birth date (YYYY-MM-DD)
        #[arg(long)]
        birth_date: NaiveDate,
    },

    /// Manage groups
    #[command(subcommand)]
    Group(GroupCommand),

    /// Enroll a catechumen into a group; prints the enrollment id
    Enroll { catechumen: Uuid, group: Uuid },

    /// Withdraw an in-progress enrollment
    Unenroll { enrollment: Uuid },

    /// Grade an enrollment
    Grade {
        enrollment: Uuid,
        #[arg(value_enum)]
        grade: GradeArg,
    },

    /// Move an in-progress enrollment to another group
    Transfer { enrollment: Uuid, group: Uuid },

    /// Suspend an active catechumen
    Suspend { catechumen: Uuid },

    /// Return a suspended or withdrawn catechumen to active
    Reactivate { catechumen: Uuid },

    /// Record attendance at one session
    Attend {
        enrollment: Uuid,

        /// Session date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Mark the catechumen absent
        #[arg(long)]
        absent: bool,
    },

    /// Close a period and record progression
    ClosePeriod { period: String },

    /// Show a catechumen's progression history
    History { catechumen: Uuid },

    /// Issue and verify sacrament certificates
    #[command(subcommand)]
    Certificate(CertificateCommand),

    /// Print a report
    Report(ReportArgs),

    /// Write a report as CSV
    Export {
        #[command(flatten)]
        report: ReportArgs,

        /// Destination CSV file
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ParishCommand {
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Default group capacity
        #[arg(long)]
        capacity: Option<u32>,
    },
}

#[derive(Subcommand)]
enum LevelCommand {
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        rank: u32,
        #[arg(long)]
        name: String,
        #[arg(long)]
        min_age: Option<u32>,
        #[arg(long)]
        max_age: Option<u32>,
        #[arg(long)]
        prerequisite: Option<String>,
        #[arg(long, value_enum)]
        sacrament: Option<SacramentArg>,
    },
    /// Remove the highest-ranked level
    Remove { id: String },
}

#[derive(Subcommand)]
enum PeriodCommand {
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        parish: String,
        #[arg(long)]
        starts: NaiveDate,
        #[arg(long)]
        ends: NaiveDate,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// Create a group; prints the new id
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        parish: String,
        #[arg(long)]
        level: String,
        #[arg(long)]
        period: String,
        /// Parish default when omitted
        #[arg(long)]
        capacity: Option<u32>,
    },
    /// Remove a group with no graded enrollments
    Remove { group: Uuid },
}

#[derive(Subcommand)]
enum CertificateCommand {
    /// Issue the certificate of a passed sacramental enrollment
    Issue { enrollment: Uuid },
    /// Look up a certificate by its verification code
    Verify { code: String },
}

#[derive(clap::Args)]
struct ReportArgs {
    #[arg(value_enum)]
    kind: ReportArg,

    #[arg(long)]
    parish: String,

    /// Required for attendance and occupancy
    #[arg(long)]
    period: Option<String>,

    #[arg(long)]
    offset: Option<usize>,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum GradeArg {
    Passed,
    Failed,
}

impl From<GradeArg> for Grade {
    fn from(arg: GradeArg) -> Self {
        match arg {
            GradeArg::Passed => Grade::Passed,
            GradeArg::Failed => Grade::Failed,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SacramentArg {
    Baptism,
    FirstCommunion,
    Confirmation,
}

impl From<SacramentArg> for Sacrament {
    fn from(arg: SacramentArg) -> Self {
        match arg {
            SacramentArg::Baptism => Sacrament::Baptism,
            SacramentArg::FirstCommunion => Sacrament::FirstCommunion,
            SacramentArg::Confirmation => Sacrament::Confirmation,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportArg {
    Progression,
    Attendance,
    Occupancy,
    Certificates,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        catequesis_core::logging::init_with_level("debug");
    } else {
        catequesis_core::logging::init();
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }
    tracing::debug!("Using data directory {:?}", config.data.data_dir);

    let office = Office::open(config)?;

    match cli.command {
        Commands::Init => cmd_init(&office),
        Commands::Parish(ParishCommand::Add { id, name, capacity }) => {
            office.add_parish(Parish {
                id: id.clone(),
                name,
                default_capacity: capacity,
            })?;
            println!("✓ Added parish {}", id);
            Ok(())
        }
        Commands::Level(LevelCommand::Add {
            id,
            rank,
            name,
            min_age,
            max_age,
            prerequisite,
            sacrament,
        }) => {
            office.add_level(CatecheticalLevel {
                id: id.clone(),
                rank,
                name,
                min_age,
                max_age,
                prerequisite,
                prepares_sacrament: sacrament.map(Sacrament::from),
            })?;
            println!("✓ Added level {} (rank {})", id, rank);
            Ok(())
        }
        Commands::Level(LevelCommand::Remove { id }) => {
            let removed = office.remove_level(&id)?;
            println!("✓ Removed level {} (rank {})", removed.id, removed.rank);
            Ok(())
        }
        Commands::Period(PeriodCommand::Add {
            id,
            parish,
            starts,
            ends,
        }) => {
            office.add_period(Period {
                id: id.clone(),
                parish_id: parish,
                starts_on: starts,
                ends_on: ends,
            })?;
            println!("✓ Added period {} ({} to {})", id, starts, ends);
            Ok(())
        }
        Commands::Register { name, birth_date } => {
            let catechumen = office.register_catechumen(&name, birth_date)?;
            println!("{}", catechumen.id);
            Ok(())
        }
        Commands::Group(GroupCommand::Create {
            name,
            parish,
            level,
            period,
            capacity,
        }) => {
            let group = office.create_group(NewGroup {
                name,
                parish_id: parish,
                level_id: level,
                period_id: period,
                capacity,
            })?;
            println!("{}", group.id);
            Ok(())
        }
        Commands::Group(GroupCommand::Remove { group }) => {
            let removed = office.remove_group(group)?;
            println!(
                "✓ Removed group {} with {} enrollment(s)",
                group,
                removed.len()
            );
            Ok(())
        }
        Commands::Enroll { catechumen, group } => {
            let enrollment = office.enroll(catechumen, group)?;
            println!("{}", enrollment.id);
            Ok(())
        }
        Commands::Unenroll { enrollment } => {
            office.unenroll(enrollment)?;
            println!("✓ Enrollment {} withdrawn", enrollment);
            Ok(())
        }
        Commands::Grade { enrollment, grade } => {
            let graded = office.record_outcome(enrollment, grade.into())?;
            println!("✓ Enrollment {} graded {:?}", enrollment, graded.outcome);
            Ok(())
        }
        Commands::Transfer { enrollment, group } => {
            office.transfer(enrollment, group)?;
            println!("✓ Enrollment {} moved to group {}", enrollment, group);
            Ok(())
        }
        Commands::Suspend { catechumen } => {
            office.suspend(catechumen)?;
            println!("✓ Catechumen {} suspended", catechumen);
            Ok(())
        }
        Commands::Reactivate { catechumen } => {
            office.reactivate(catechumen)?;
            println!("✓ Catechumen {} reactivated", catechumen);
            Ok(())
        }
        Commands::Attend {
            enrollment,
            date,
            absent,
        } => {
            office.mark_attendance(enrollment, date, !absent)?;
            let mark = if absent { "absent" } else { "present" };
            println!("✓ {} marked {} on {}", enrollment, mark, date);
            Ok(())
        }
        Commands::ClosePeriod { period } => cmd_close_period(&office, &period),
        Commands::History { catechumen } => cmd_history(&office, catechumen),
        Commands::Certificate(CertificateCommand::Issue { enrollment }) => {
            let certificate = office.issue_certificate(enrollment)?;
            println!("✓ Certificate {} ({:?})", certificate.number, certificate.sacrament);
            println!("  Verification code: {}", certificate.verification_code);
            Ok(())
        }
        Commands::Certificate(CertificateCommand::Verify { code }) => cmd_verify(&office, &code),
        Commands::Report(args) => cmd_report(&office, &args),
        Commands::Export { report, output } => {
            let rows = office.export(&report_query(&report)?, &output)?;
            println!("✓ Exported {} rows", rows);
            println!("  CSV: {}", output.display());
            Ok(())
        }
    }
}

fn cmd_init(office: &Office) -> Result<()> {
    let catalog_path = office.config().data.catalog_path();
    if catalog_path.exists() {
        println!("Catalog already present at {}", catalog_path.display());
        return Ok(());
    }

    office.save_catalog()?;
    let catalog = office.catalog();
    println!("✓ Wrote catalog to {}", catalog_path.display());
    for level in &catalog.levels {
        println!("  {}. {} ({})", level.rank, level.name, level.id);
    }
    Ok(())
}

fn cmd_close_period(office: &Office, period: &str) -> Result<()> {
    let records = office.close_period(period)?;
    println!("✓ Closed period {}: {} record(s)", period, records.len());
    for record in &records {
        println!(
            "  {} {} {:?}",
            record.catechumen_id, record.level_id, record.outcome
        );
    }
    Ok(())
}

fn cmd_history(office: &Office, catechumen: Uuid) -> Result<()> {
    let person = office.catechumen(catechumen)?;
    println!("{} ({:?})", person.full_name, person.status);
    match &person.current_level {
        Some(level) => println!("  Current level: {}", level),
        None => println!("  Current level: not yet assigned"),
    }

    for record in office.progression_history(catechumen)? {
        let sacrament = record
            .sacrament
            .map(|s| format!(" [{:?}]", s))
            .unwrap_or_default();
        println!(
            "  {} {} {:?}{}",
            record.period_id, record.level_id, record.outcome, sacrament
        );
    }
    Ok(())
}

fn cmd_verify(office: &Office, code: &str) -> Result<()> {
    let certificate = office.verify_certificate(code)?;
    let person = office.catechumen(certificate.catechumen_id)?;
    let parish = office
        .catalog()
        .parish(&certificate.parish_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|_| certificate.parish_id.clone());
    println!("✓ Valid certificate {}", certificate.number);
    println!("  {} received {:?}", person.full_name, certificate.sacrament);
    println!("  Issued {} by {}", certificate.issued_at.date_naive(), parish);
    Ok(())
}

fn cmd_report(office: &Office, args: &ReportArgs) -> Result<()> {
    let report = office.report(&report_query(args)?)?;

    match &report.rows {
        ReportRows::ProgressionSummary(rows) => {
            for row in rows {
                println!(
                    "{} {} passed={} failed={} withdrawn={}",
                    row.period_id, row.level_id, row.passed, row.failed, row.withdrawn
                );
            }
        }
        ReportRows::Attendance(rows) => {
            for row in rows {
                println!(
                    "{} {} {}/{} ({:.0}%)",
                    row.group_name,
                    row.catechumen_name,
                    row.present,
                    row.sessions,
                    row.attendance_percent
                );
            }
        }
        ReportRows::GroupOccupancy(rows) => {
            for row in rows {
                println!(
                    "{} {} {}/{} ({} free)",
                    row.group_name, row.level_id, row.enrolled, row.capacity, row.available
                );
            }
        }
        ReportRows::Certificates(rows) => {
            for row in rows {
                println!(
                    "{} {} {:?} {} {}",
                    row.number, row.catechumen_name, row.sacrament, row.issued_on, row.verification_code
                );
            }
        }
    }
    println!(
        "({} of {} rows)",
        report.rows.len(),
        report.total_rows
    );
    Ok(())
}

fn report_query(args: &ReportArgs) -> Result<ReportQuery> {
    let period = || {
        args.period
            .clone()
            .ok_or_else(|| Error::InvalidInput("--period is required for this report".into()))
    };
    let kind = match args.kind {
        ReportArg::Progression => ReportKind::ProgressionSummary {
            period_id: args.period.clone(),
        },
        ReportArg::Attendance => ReportKind::Attendance { period_id: period()? },
        ReportArg::Occupancy => ReportKind::GroupOccupancy { period_id: period()? },
        ReportArg::Certificates => ReportKind::Certificates {
            period_id: args.period.clone(),
        },
    };
    let page = match (args.offset, args.limit) {
        (None, None) => None,
        (offset, limit) => Some(Page {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(usize::MAX),
        }),
    };

    Ok(ReportQuery {
        parish_id: args.parish.clone(),
        kind,
        page,
    })
}
