use crate::core::expression::math::FUNCTIONS;
use crate::core::{EngineConfig, VariableCalculator};
use crate::error::{PanelError, PanelResult};
use crate::parser;
use crate::writer;
use colored::Colorize;
use std::path::PathBuf;

/// Rows shown when no output file is given
const PREVIEW_ROWS: usize = 20;

/// Apply command-line overrides to the job's engine settings
fn engine_config(
    mut config: EngineConfig,
    threads: Option<usize>,
    sequential: bool,
) -> PanelResult<EngineConfig> {
    if let Some(threads) = threads {
        if threads == 0 {
            return Err(PanelError::Config(
                "--threads must be at least 1".to_string(),
            ));
        }
        config.max_threads = Some(threads);
    }
    if sequential {
        config.parallel = false;
    }
    Ok(config)
}

/// Execute the compute command
pub fn compute(
    file: PathBuf,
    output: Option<PathBuf>,
    threads: Option<usize>,
    sequential: bool,
    verbose: bool,
) -> PanelResult<()> {
    println!("{}", "📊 panelvar - Computing variables".bold().green());
    println!("   Job: {}", file.display());

    let job = parser::parse_job(&file)?;
    let engine = engine_config(job.engine.clone(), threads, sequential)?;

    println!(
        "   {} rows, {} columns, {} formulas (entity: {}, time: {})",
        job.dataset.row_count(),
        job.dataset.columns().len(),
        job.formulas.len(),
        job.entity_column.bright_blue(),
        job.time_column.bright_blue()
    );
    if verbose {
        for formula in &job.formulas {
            println!(
                "      {} [{}] {}",
                formula.name().cyan(),
                formula.kind(),
                formula.describe().bright_yellow()
            );
        }
    }
    println!();

    let calculator = VariableCalculator::new(
        &job.dataset,
        job.entity_column.as_str(),
        job.time_column.as_str(),
        &engine,
    )?;
    let result = calculator.calculate(&job.formulas, &mut |done, total, name| {
        println!("   [{}/{}] {}", done, total, name.cyan());
    });
    let table = match result {
        Ok(table) => table,
        Err(e) => {
            println!("\n{}", format!("❌ {}", e).bold().red());
            return Err(e);
        }
    };
    println!();

    match output {
        Some(path) => {
            writer::write_result(&table, &path)?;
            println!(
                "{}",
                format!(
                    "✅ Wrote {} variables x {} rows to {}",
                    table.variables.len(),
                    table.row_count(),
                    path.display()
                )
                .bold()
                .green()
            );
        }
        None => {
            println!("{}", "✅ Results:".bold().green());
            print!("{}", writer::preview(&table, PREVIEW_ROWS));
        }
    }
    Ok(())
}

/// Execute the validate command: load each job and check its formula plan
pub fn validate(files: Vec<PathBuf>) -> PanelResult<()> {
    println!("{}", "✅ Validating jobs".bold().green());

    let mut failed = 0;
    for file in &files {
        println!("\n   File: {}", file.display());

        let plan = parser::parse_job(file).and_then(|job| {
            let calculator = VariableCalculator::new(
                &job.dataset,
                job.entity_column.as_str(),
                job.time_column.as_str(),
                &EngineConfig::sequential(),
            )?;
            calculator.plan(&job.formulas)
        });

        match plan {
            Ok(steps) => {
                for step in &steps {
                    println!(
                        "      {} [{}] <- {}",
                        step.name.cyan(),
                        step.kind,
                        step.references.join(", ")
                    );
                }
                println!("   {}", format!("{} formulas OK", steps.len()).green());
            }
            Err(e) => {
                failed += 1;
                println!("   {}", format!("❌ {}", e).bold().red());
            }
        }
    }

    println!();
    if failed > 0 {
        return Err(PanelError::Config(format!(
            "{} of {} job files failed validation",
            failed,
            files.len()
        )));
    }
    println!("{}", "✅ All jobs are valid!".bold().green());
    Ok(())
}

/// Execute the functions command
pub fn functions() -> PanelResult<()> {
    println!("{}", "📚 Supported functions".bold().green());
    for (name, description) in FUNCTIONS {
        println!("   {:<18} {}", name.cyan(), description);
    }

    println!("\n{}", "🔣 Operators (lowest precedence first)".bold().green());
    for (ops, description) in [
        ("or  |", "boolean or"),
        ("and &", "boolean and"),
        ("not", "boolean negation"),
        ("== != < <= > >=", "comparison"),
        ("+ -", "addition, subtraction"),
        ("* /", "multiplication, division"),
        ("-x +x", "unary sign"),
        ("**", "power (right-associative)"),
    ] {
        println!("   {:<18} {}", ops.cyan(), description);
    }

    println!("\n{}", "↔ Row-relative references".bold().green());
    println!("   {:<18} value of Col in the current row", "Col(x)".cyan());
    println!("   {:<18} N rows earlier within the entity", "Col(x-N)".cyan());
    println!("   {:<18} N rows later within the entity", "Col(x+N)".cyan());
    println!(
        "   {:<18} Col shifted back K rows (general expressions)",
        "Col_lagK, Col{K}".cyan()
    );
    Ok(())
}
