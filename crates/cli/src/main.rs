use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tamiz_core::alerts::{self, AlertPlan, BulkAlert, CONFIRMED_EXPORT_COLUMNS};
use tamiz_core::classifier::{self, ScreeningStatus};
use tamiz_core::config::path_from_env_value;
use tamiz_core::constants::{DEFAULT_COUNTRY_CODE, DEFAULT_GEOGRAPHY_PATH, DEFAULT_RECORDS_PATH};
use tamiz_core::reporting::{self, IncidenceKey, ScreeningSummary};
use tamiz_core::session::RecipientKind;
use tamiz_core::workflow::{LabResultsForm, NewCardForm, SecondSampleForm};
use tamiz_core::{
    CoreConfig, Field, ScreeningError, ScreeningRecord, ScreeningService, Session, SmsCredentials,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tamiz")]
#[command(about = "Congenital hypothyroidism newborn screening records")]
struct Cli {
    /// Record table (overrides TAMIZ_RECORDS_CSV)
    #[arg(long, global = true)]
    records: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new screening card
    Register(RegisterArgs),
    /// Attach lab results to a card
    Results(ResultsArgs),
    /// Show one card
    Find {
        /// Ficha number
        ficha: String,
    },
    /// List every card with its status
    List,
    /// Screening summary, monthly trend and incidence
    Summary {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Alert one confirmed case
    Notify(NotifyArgs),
    /// Alert every confirmed case
    NotifyAll(NotifyAllArgs),
    /// Export records as CSV
    Export {
        /// Only confirmed cases, with the confirmed-case columns
        #[arg(long)]
        confirmed: bool,
        /// Comma-separated column names
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Output file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// List departments
    Departments,
    /// List the municipalities of a department
    Municipalities {
        /// Department code
        department_code: String,
    },
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    ficha: String,
    /// e.g. 5-May-19, 05/05/2019 or 2019-05-05
    #[arg(long)]
    ingestion_date: String,
    #[arg(long)]
    institution: String,
    /// ARS / EPS
    #[arg(long)]
    insurer: String,
    #[arg(long, default_value = "")]
    clinical_history: String,
    /// CC, CE, PA, RC or TI
    #[arg(long)]
    document_type: String,
    #[arg(long)]
    document_number: String,
    #[arg(long)]
    department: String,
    #[arg(long)]
    municipality: String,
    #[arg(long, default_value = "")]
    phone_1: String,
    #[arg(long, default_value = "")]
    phone_2: String,
    #[arg(long, default_value = "")]
    address: String,
    #[arg(long)]
    surname_1: String,
    #[arg(long, default_value = "")]
    surname_2: String,
    #[arg(long)]
    newborn_name: String,
    #[arg(long)]
    birth_date: String,
    /// Grams
    #[arg(long)]
    weight: String,
    /// MASCULINO, FEMENINO or INDETERMINADO
    #[arg(long)]
    sex: String,
    #[arg(long)]
    premature: bool,
    #[arg(long)]
    transfused: bool,
    #[arg(long)]
    information_complete: bool,
    #[arg(long)]
    sample_adequate: bool,
    /// CONTRIBUTIVO, SUBSIDIADO, VINCULADO, PARTICULAR or ESPECIAL
    #[arg(long)]
    affiliation_type: String,
    /// CORDON, TALON or VENA
    #[arg(long)]
    sample_type: String,
    /// ACEPTADA or RECHAZADA
    #[arg(long)]
    sample_destination: String,
    #[arg(long)]
    sample_collected_on: String,
    #[arg(long)]
    sample_rejected: bool,
    #[arg(long, default_value = "")]
    rejected_collected_on: String,
}

impl From<RegisterArgs> for NewCardForm {
    fn from(a: RegisterArgs) -> Self {
        NewCardForm {
            ficha: a.ficha,
            ingestion_date: a.ingestion_date,
            institution: a.institution,
            insurer: a.insurer,
            clinical_history: a.clinical_history,
            document_type: a.document_type,
            document_number: a.document_number,
            department: a.department,
            municipality: a.municipality,
            phone_1: a.phone_1,
            phone_2: a.phone_2,
            address: a.address,
            surname_1: a.surname_1,
            surname_2: a.surname_2,
            newborn_name: a.newborn_name,
            birth_date: a.birth_date,
            weight: a.weight,
            sex: a.sex,
            premature: a.premature,
            transfused: a.transfused,
            information_complete: a.information_complete,
            sample_adequate: a.sample_adequate,
            affiliation_type: a.affiliation_type,
            sample_type: a.sample_type,
            sample_destination: a.sample_destination,
            sample_collected_on: a.sample_collected_on,
            sample_rejected: a.sample_rejected,
            rejected_collected_on: a.rejected_collected_on,
        }
    }
}

#[derive(Args)]
struct ResultsArgs {
    /// Ficha number of the card
    ficha: String,
    #[arg(long)]
    result_date: String,
    /// First-sample TSH (µIU/mL)
    #[arg(long)]
    tsh: String,
    #[arg(long, default_value = "")]
    ficha_2: String,
    #[arg(long, default_value = "")]
    sample_type_2: String,
    #[arg(long, default_value = "")]
    collected_on_2: String,
    #[arg(long, default_value = "")]
    result_date_2: String,
    /// Second-sample TSH (µIU/mL), required when the first is at or above the cutoff
    #[arg(long, default_value = "")]
    tsh_2: String,
    /// Alert the family at this number if the case is confirmed
    #[arg(long)]
    patient_phone: Option<String>,
    #[arg(long)]
    patient_message: Option<String>,
    /// Alert the institution at this number if the case is confirmed
    #[arg(long)]
    institution_phone: Option<String>,
    #[arg(long)]
    institution_message: Option<String>,
    /// Really send alerts instead of simulating them
    #[arg(long)]
    live: bool,
    /// Write the SMS log of this run as CSV
    #[arg(long)]
    sms_log: Option<PathBuf>,
}

#[derive(Args)]
struct NotifyArgs {
    /// Ficha number of a confirmed case
    ficha: String,
    /// Alert the family (at --patient-phone or the stored phone)
    #[arg(long)]
    patient: bool,
    #[arg(long)]
    patient_phone: Option<String>,
    #[arg(long)]
    patient_message: Option<String>,
    /// Alert the institution at this number
    #[arg(long)]
    institution_phone: Option<String>,
    #[arg(long)]
    institution_message: Option<String>,
    #[arg(long)]
    live: bool,
    #[arg(long)]
    sms_log: Option<PathBuf>,
}

#[derive(Args)]
struct NotifyAllArgs {
    /// Patient template; {tsh} and {ars} are substituted
    #[arg(long, default_value = alerts::DEFAULT_PATIENT_TEMPLATE)]
    patient_template: String,
    /// One institution number for every case
    #[arg(long)]
    institution_phone: Option<String>,
    #[arg(long, default_value = alerts::DEFAULT_INSTITUTION_TEMPLATE)]
    institution_template: String,
    /// Skip cases already alerted in this run
    #[arg(long)]
    skip_notified: bool,
    #[arg(long)]
    live: bool,
    #[arg(long)]
    sms_log: Option<PathBuf>,
}

fn load_config(records: Option<PathBuf>) -> anyhow::Result<CoreConfig> {
    let records_path = records.unwrap_or_else(|| {
        path_from_env_value(std::env::var("TAMIZ_RECORDS_CSV").ok(), DEFAULT_RECORDS_PATH)
    });
    let geography_path =
        path_from_env_value(std::env::var("TAMIZ_MUNICIPIOS_CSV").ok(), DEFAULT_GEOGRAPHY_PATH);
    let country_code = std::env::var("TAMIZ_COUNTRY_CODE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string());
    let credentials = SmsCredentials::from_parts(
        std::env::var("TWILIO_ACCOUNT_SID").ok(),
        std::env::var("TWILIO_AUTH_TOKEN").ok(),
        std::env::var("TWILIO_FROM_NUMBER").ok(),
    );

    Ok(CoreConfig::new(
        records_path,
        geography_path,
        country_code,
        credentials,
    )?)
}

fn print_card(record: &ScreeningRecord) {
    let tsh = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
    let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
    println!("ID:           {}", record.id_label());
    println!("Ficha:        {}", record.ficha_id);
    println!("Newborn:      {}", record.display_name());
    println!("Birth date:   {}", date(record.birth_date));
    println!("Institution:  {}", record.institution);
    println!("ARS:          {}", record.insurer);
    println!("Municipality: {} ({})", record.city, record.department);
    println!("TSH 1:        {} µIU/mL", tsh(record.tsh_neonatal));
    println!("TSH 2:        {} µIU/mL", tsh(record.tsh_second));
    println!("Status:       {}", classifier::classify(record));
}

fn write_sms_log(session: &Session, path: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(path) = path {
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        session.sms_log().write_csv(file)?;
        println!("SMS log written to {}", path.display());
    }
    Ok(())
}

fn print_outcome(kind: RecipientKind, success: bool, status: &str) {
    let mark = if success { "ok" } else { "FAILED" };
    println!("{kind}: {mark} {status}");
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = Arc::new(load_config(cli.records)?);
    let service = ScreeningService::new(cfg.clone());
    let mut session = Session::open(&cfg)?;

    match cli.command {
        Commands::Register(args) => {
            let today = chrono::Local::now().date_naive();
            let card = service.register_card(&args.into(), today, &session)?;
            for warning in &card.warnings {
                println!("warning: {warning}");
            }
            println!(
                "Card #{} saved (ficha {})",
                card.record.id_label(),
                card.record.ficha_id
            );
        }
        Commands::Results(args) => {
            if service.second_sample_required(&args.tsh) && args.tsh_2.trim().is_empty() {
                println!("TSH 1 = {} is at or above the cutoff: a second sample is required", args.tsh.trim());
            }
            let form = LabResultsForm {
                result_date: args.result_date,
                tsh: args.tsh,
                second: SecondSampleForm {
                    ficha: args.ficha_2,
                    sample_type: args.sample_type_2,
                    collected_on: args.collected_on_2,
                    result_date: args.result_date_2,
                    tsh: args.tsh_2,
                },
            };
            let plan = AlertPlan {
                patient_phone: args.patient_phone,
                patient_message: args.patient_message,
                institution_phone: args.institution_phone,
                institution_message: args.institution_message,
                test_mode: !args.live,
            };
            let outcome = service.attach_lab_results(&args.ficha, &form, &plan, &mut session)?;
            println!(
                "Results saved for ficha {}: {}",
                outcome.record.ficha_id, outcome.status
            );
            for n in &outcome.notifications {
                print_outcome(n.recipient, n.outcome.success, &n.outcome.status);
            }
            write_sms_log(&session, args.sms_log)?;
        }
        Commands::Find { ficha } => {
            let stored = service.find(&ficha)?;
            print_card(&stored.record);
        }
        Commands::List => {
            let records = service.store().list()?;
            if records.is_empty() {
                println!("No records found.");
            }
            for record in records {
                println!(
                    "{:>5}  {:<12} {:<30} {}",
                    record.id_label(),
                    record.ficha_id,
                    record.display_name(),
                    classifier::classify(&record)
                );
            }
        }
        Commands::Summary { json } => {
            let records = service.store().list()?;
            let summary = ScreeningSummary::from_records(&records);
            let trend = reporting::monthly_trend(&records);
            let by_sample = reporting::incidence_by(&records, IncidenceKey::SampleType);
            let by_sex = reporting::incidence_by(&records, IncidenceKey::Sex);
            if json {
                let report = serde_json::json!({
                    "summary": summary,
                    "monthly_trend": trend,
                    "incidence_by_sample_type": by_sample,
                    "incidence_by_sex": by_sex,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Screened:            {}", summary.screened);
                for status in ScreeningStatus::ALL {
                    println!("{:<20} {}", format!("{}:", status.label()), summary.count(status));
                }
                println!("Suspected:           {}", summary.suspected);
                println!("Confirmed:           {}", summary.confirmed);
                println!("Confirmation rate:   {:.1}%", summary.confirmation_rate * 100.0);
                if let Some(mean) = summary.mean_confirmed_tsh {
                    println!("Mean TSH 2 (conf.):  {mean:.1} µIU/mL");
                }
                println!("Institutions (conf.): {}", summary.confirmed_institutions);
                for month in trend {
                    let rate = month
                        .rate
                        .map(|r| format!("{:.1}%", r * 100.0))
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "{}  suspected {:>3}  confirmed {:>3}  rate {rate}",
                        month.month, month.suspected, month.confirmed
                    );
                }
                for group in by_sample.iter().chain(&by_sex) {
                    println!(
                        "{:<14} {:>4} records  {:>3} confirmed  {:.2}%",
                        group.group, group.total, group.confirmed, group.percent
                    );
                }
            }
        }
        Commands::Notify(args) => {
            let record = service.find(&args.ficha)?.record;
            if !classifier::is_confirmed(&record) {
                anyhow::bail!("ficha {} is not a confirmed case", record.ficha_id);
            }
            let test_mode = !args.live;
            if args.patient {
                let phone = args
                    .patient_phone
                    .or_else(|| alerts::patient_phone(&record).map(str::to_string))
                    .context("no patient phone stored; pass --patient-phone")?;
                let message = args
                    .patient_message
                    .unwrap_or_else(|| alerts::patient_message(&record));
                let n = alerts::notify_case(
                    service.notifier(),
                    &mut session,
                    &record,
                    RecipientKind::Patient,
                    &phone,
                    &message,
                    test_mode,
                );
                print_outcome(n.recipient, n.outcome.success, &n.outcome.status);
            }
            if let Some(phone) = args.institution_phone {
                let message = args
                    .institution_message
                    .unwrap_or_else(|| alerts::institution_message(&record));
                let n = alerts::notify_case(
                    service.notifier(),
                    &mut session,
                    &record,
                    RecipientKind::Institution,
                    &phone,
                    &message,
                    test_mode,
                );
                print_outcome(n.recipient, n.outcome.success, &n.outcome.status);
            }
            write_sms_log(&session, args.sms_log)?;
        }
        Commands::NotifyAll(args) => {
            let records = service.store().list()?;
            let alert = BulkAlert {
                patient_template: args.patient_template,
                institution_phone: args.institution_phone,
                institution_template: args.institution_template,
                test_mode: !args.live,
                skip_already_notified: args.skip_notified,
            };
            let report = alerts::notify_confirmed(service.notifier(), &records, &alert, &mut session);
            println!(
                "Completed: {} cases, {} sent, {} failed, {} without phone",
                report.cases, report.patient.sent, report.patient.failed, report.without_phone
            );
            if alert.institution_phone.is_some() {
                println!(
                    "Institution: {} sent, {} failed",
                    report.institution.sent, report.institution.failed
                );
            }
            write_sms_log(&session, args.sms_log)?;
        }
        Commands::Export {
            confirmed,
            columns,
            output,
        } => {
            let fields: Vec<Field> = if !columns.is_empty() {
                columns
                    .iter()
                    .map(|c| Field::from_column(c).with_context(|| format!("unknown column '{c}'")))
                    .collect::<anyhow::Result<_>>()?
            } else if confirmed {
                CONFIRMED_EXPORT_COLUMNS.to_vec()
            } else {
                Field::ALL.to_vec()
            };
            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            let written = service.store().export(writer, &fields, |record| {
                !confirmed || classifier::is_confirmed(record)
            })?;
            if let Some(path) = output {
                println!("{written} records written to {}", path.display());
            }
        }
        Commands::Departments => {
            for department in session.geography().departments() {
                println!("{}  {}", department.code, department.name);
            }
        }
        Commands::Municipalities { department_code } => {
            for municipality in session.geography().municipalities(&department_code) {
                println!("{}  {}", municipality.code, municipality.name);
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = match "tamiz=info".parse() {
        Ok(directive) => tracing_subscriber::EnvFilter::from_default_env().add_directive(directive),
        Err(_) => tracing_subscriber::EnvFilter::from_default_env(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ScreeningError>() {
                Some(ScreeningError::Validation(errors)) => {
                    eprintln!("{} error(s):", errors.len());
                    for error in errors.iter() {
                        eprintln!("- {error}");
                    }
                }
                _ => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
