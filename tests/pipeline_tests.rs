//! Variable computation pipeline tests
//!
//! Panel used throughout (entity = Firm, time = Year):
//!   A 2020 Revenue 100 | A 2021 Revenue 110 | B 2020 Revenue 50 | B 2021 Revenue 55

use panelvar::core::{EngineConfig, VariableCalculator};
use panelvar::error::PanelError;
use panelvar::types::{Column, Dataset, Formula, ResultTable};
use pretty_assertions::assert_eq;

fn panel() -> Dataset {
    Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "B", "B"].iter().map(|s| Some(s.to_string())).collect(),
        ),
        Column::numbers(
            "Year",
            vec![Some(2020.0), Some(2021.0), Some(2020.0), Some(2021.0)],
        ),
        Column::numbers(
            "Revenue",
            vec![Some(100.0), Some(110.0), Some(50.0), Some(55.0)],
        ),
    ])
    .unwrap()
}

fn run(dataset: &Dataset, formulas: &[Formula]) -> Result<ResultTable, PanelError> {
    VariableCalculator::new(dataset, "Firm", "Year", &EngineConfig::default())?
        .calculate_all(formulas)
}

fn values(table: &ResultTable, name: &str) -> Vec<Option<f64>> {
    table.get(name).expect("variable present").to_vec()
}

fn assert_close(actual: &[Option<f64>], expected: &[Option<f64>]) {
    assert_eq!(actual.len(), expected.len());
    for (row, (a, e)) in actual.iter().zip(expected).enumerate() {
        match (a, e) {
            (Some(a), Some(e)) => assert!((a - e).abs() < 1e-9, "row {}: {} != {}", row, a, e),
            _ => assert_eq!(a, e, "row {}", row),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_grouped_mean() {
    let table = run(&panel(), &[Formula::mean("Rev_mean", "Revenue", &["Firm"])]).unwrap();
    assert_eq!(
        values(&table, "Rev_mean"),
        vec![Some(105.0), Some(105.0), Some(52.5), Some(52.5)]
    );
}

#[test]
fn test_whole_column_stdev() {
    let table = run(&panel(), &[Formula::stdev("Rev_sd", "Revenue", &[])]).unwrap();
    let sd = Some(30.652_623_596_249_2);
    assert_close(&values(&table, "Rev_sd"), &[sd, sd, sd, sd]);
}

#[test]
fn test_lag() {
    let table = run(&panel(), &[Formula::expression("Rev_lag", "Revenue(x-1)")]).unwrap();
    assert_eq!(
        values(&table, "Rev_lag"),
        vec![None, Some(100.0), None, Some(50.0)]
    );
}

#[test]
fn test_lead_comparison() {
    let table = run(
        &panel(),
        &[Formula::expression(
            "Rev_up",
            "IF(Revenue(x+1) > Revenue(x), 1, 0)",
        )],
    )
    .unwrap();
    assert_eq!(
        values(&table, "Rev_up"),
        vec![Some(1.0), None, Some(1.0), None]
    );
}

#[test]
fn test_vectorized_expression() {
    let table = run(&panel(), &[Formula::expression("Rev_2", "Revenue * 2")]).unwrap();
    assert_eq!(
        values(&table, "Rev_2"),
        vec![Some(200.0), Some(220.0), Some(100.0), Some(110.0)]
    );
}

#[test]
fn test_out_of_range_offset_never_reaches_function() {
    let table = run(&panel(), &[Formula::expression("Log_lag", "log(Revenue(x-1))")]).unwrap();
    assert_close(
        &values(&table, "Log_lag"),
        &[None, Some(100f64.ln()), None, Some(50f64.ln())],
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// RESULT TABLE SHAPE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_result_table_has_keys_then_formulas_in_order() {
    let table = run(
        &panel(),
        &[
            Formula::expression("b", "Revenue + 1"),
            Formula::mean("a", "Revenue", &[]),
        ],
    )
    .unwrap();
    let names: Vec<&str> = table.columns().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Firm", "Year", "b", "a"]);
    assert_eq!(table.row_count(), 4);
    assert_eq!(values(&table, "a"), vec![Some(78.75); 4]);
}

#[test]
fn test_input_dataset_is_not_modified() {
    let dataset = panel();
    let before = dataset.clone();
    run(&dataset, &[Formula::expression("Revenue", "Revenue * 10")]).unwrap();
    assert_eq!(dataset.columns(), before.columns());
}

// ═══════════════════════════════════════════════════════════════════════════
// CHAINING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_chaining_uses_earlier_results() {
    let table = run(
        &panel(),
        &[
            Formula::expression("Double", "Revenue * 2"),
            Formula::expression("Double_chg", "Double(x) - Double(x-1)"),
            Formula::mean("Chg_mean", "Double_chg", &[]),
        ],
    )
    .unwrap();
    assert_eq!(
        values(&table, "Double_chg"),
        vec![None, Some(20.0), None, Some(10.0)]
    );
    assert_eq!(values(&table, "Chg_mean"), vec![Some(15.0); 4]);
}

#[test]
fn test_chaining_sees_sanitized_values() {
    let table = run(
        &panel(),
        &[
            Formula::expression("Inf", "Revenue / 0"),
            Formula::expression("Next", "Inf * 0 + 1"),
        ],
    )
    .unwrap();
    assert_eq!(values(&table, "Inf"), vec![None; 4]);
    // inf * 0 would be NaN; a missing input stays missing instead
    assert_eq!(values(&table, "Next"), vec![None; 4]);
}

#[test]
fn test_computed_column_shadows_base_column() {
    let table = run(
        &panel(),
        &[
            Formula::expression("Revenue", "Revenue * 10"),
            Formula::expression("Next", "Revenue + 1"),
        ],
    )
    .unwrap();
    assert_eq!(
        values(&table, "Next"),
        vec![Some(1001.0), Some(1101.0), Some(501.0), Some(551.0)]
    );
}

#[test]
fn test_duplicate_name_replaces_in_place() {
    let table = run(
        &panel(),
        &[
            Formula::expression("x", "Revenue"),
            Formula::expression("y", "x + 1"),
            Formula::expression("x", "Revenue * 3"),
        ],
    )
    .unwrap();
    let names: Vec<&str> = table.variables.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
    assert_eq!(
        values(&table, "x"),
        vec![Some(300.0), Some(330.0), Some(150.0), Some(165.0)]
    );
    assert_eq!(
        values(&table, "y"),
        vec![Some(101.0), Some(111.0), Some(51.0), Some(56.0)]
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// MISSING VALUES AND ROW-LOCAL ERRORS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_math_errors_are_row_local() {
    let dataset = Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "A"].iter().map(|s| Some(s.to_string())).collect(),
        ),
        Column::numbers("Year", vec![Some(1.0), Some(2.0), Some(3.0)]),
        Column::numbers("Profit", vec![Some(10.0), Some(-5.0), Some(0.0)]),
    ])
    .unwrap();
    let table = run(
        &dataset,
        &[
            Formula::expression("Log", "log(Profit(x))"),
            Formula::expression("Sqrt", "sqrt(Profit(x))"),
            Formula::expression("Ratio", "Profit(x-1) / Profit(x)"),
            Formula::expression("Exp", "exp(Profit(x) * 1000)"),
        ],
    )
    .unwrap();
    assert_close(&values(&table, "Log"), &[Some(10f64.ln()), None, None]);
    assert_close(&values(&table, "Sqrt"), &[Some(10f64.sqrt()), None, Some(0.0)]);
    assert_eq!(values(&table, "Ratio"), vec![None, Some(-2.0), None]);
    assert_eq!(values(&table, "Exp"), vec![None, Some(0.0), Some(1.0)]);
}

#[test]
fn test_missing_input_propagates() {
    let dataset = Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "A"].iter().map(|s| Some(s.to_string())).collect(),
        ),
        Column::numbers("Year", vec![Some(1.0), Some(2.0), Some(3.0)]),
        Column::numbers("v", vec![Some(1.0), None, Some(3.0)]),
    ])
    .unwrap();
    let table = run(
        &dataset,
        &[
            Formula::expression("lagged", "v(x-1) + 0"),
            Formula::expression("flag", "IF(v(x) > 0, 1, 0)"),
            Formula::expression("plain", "v * 2"),
            Formula::mean("avg", "v", &[]),
        ],
    )
    .unwrap();
    assert_eq!(values(&table, "lagged"), vec![None, Some(1.0), None]);
    assert_eq!(values(&table, "flag"), vec![Some(1.0), None, Some(1.0)]);
    assert_eq!(values(&table, "plain"), vec![Some(2.0), None, Some(6.0)]);
    assert_eq!(values(&table, "avg"), vec![Some(2.0); 3]);
}

#[test]
fn test_degenerate_groups_are_missing() {
    let dataset = Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "B", "C"].iter().map(|s| Some(s.to_string())).collect(),
        ),
        Column::numbers("Year", vec![Some(1.0), Some(2.0), Some(1.0), Some(1.0)]),
        Column::numbers("v", vec![Some(1.0), Some(3.0), Some(5.0), None]),
    ])
    .unwrap();
    let table = run(
        &dataset,
        &[
            Formula::stdev("sd", "v", &["Firm"]),
            Formula::mean("avg", "v", &["Firm"]),
        ],
    )
    .unwrap();
    assert_close(
        &values(&table, "sd"),
        &[Some(2f64.sqrt()), Some(2f64.sqrt()), None, None],
    );
    assert_eq!(
        values(&table, "avg"),
        vec![Some(2.0), Some(2.0), Some(5.0), None]
    );
}

#[test]
fn test_stdev_with_one_value_is_missing_everywhere() {
    let dataset = Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "B", "B"].iter().map(|s| Some(s.to_string())).collect(),
        ),
        Column::numbers("Year", vec![Some(1.0), Some(2.0), Some(1.0), Some(2.0)]),
        Column::numbers("v", vec![Some(5.0), None, None, None]),
    ])
    .unwrap();
    let table = run(&dataset, &[Formula::stdev("sd", "v", &[])]).unwrap();
    assert_eq!(values(&table, "sd"), vec![None; 4]);
}

/// A 2020..2022 with Revenue 100, NaN, 110 and B 2020..2021 with 50, 55
fn panel_with_nan() -> Dataset {
    Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "A", "B", "B"]
                .iter()
                .map(|s| Some(s.to_string()))
                .collect(),
        ),
        Column::numbers(
            "Year",
            vec![Some(2020.0), Some(2021.0), Some(2022.0), Some(2020.0), Some(2021.0)],
        ),
        Column::numbers(
            "Revenue",
            vec![Some(100.0), Some(f64::NAN), Some(110.0), Some(50.0), Some(55.0)],
        ),
    ])
    .unwrap()
}

#[test]
fn test_nan_input_is_ignored_by_aggregates() {
    let table = run(
        &panel_with_nan(),
        &[
            Formula::mean("Rev_mean", "Revenue", &["Firm"]),
            Formula::stdev("Rev_sd", "Revenue", &["Firm"]),
        ],
    )
    .unwrap();
    assert_eq!(
        values(&table, "Rev_mean"),
        vec![Some(105.0), Some(105.0), Some(105.0), Some(52.5), Some(52.5)]
    );
    let a = Some(50f64.sqrt());
    let b = Some(12.5f64.sqrt());
    assert_close(&values(&table, "Rev_sd"), &[a, a, a, b, b]);
}

#[test]
fn test_nan_input_makes_rows_missing() {
    let table = run(
        &panel_with_nan(),
        &[
            Formula::expression("positive", "IF(Revenue(x) > 0, 1, 0)"),
            Formula::expression("seven", "Revenue(x-1) * 0 + 7"),
            Formula::expression("doubled", "Revenue * 2"),
        ],
    )
    .unwrap();
    assert_eq!(
        values(&table, "positive"),
        vec![Some(1.0), None, Some(1.0), Some(1.0), Some(1.0)]
    );
    assert_eq!(
        values(&table, "seven"),
        vec![None, Some(7.0), None, None, Some(7.0)]
    );
    assert_eq!(
        values(&table, "doubled"),
        vec![Some(200.0), None, Some(220.0), Some(100.0), Some(110.0)]
    );
}

#[test]
fn test_missing_group_key_forms_own_group() {
    let dataset = Dataset::from_columns(vec![
        Column::text(
            "Firm",
            vec![Some("A".to_string()), None, Some("A".to_string()), None],
        ),
        Column::numbers("Year", vec![Some(1.0), Some(1.0), Some(2.0), Some(2.0)]),
        Column::numbers("v", vec![Some(1.0), Some(10.0), Some(3.0), Some(20.0)]),
    ])
    .unwrap();
    let table = run(
        &dataset,
        &[
            Formula::mean("avg", "v", &["Firm"]),
            Formula::expression("lag", "v(x-1)"),
        ],
    )
    .unwrap();
    assert_eq!(
        values(&table, "avg"),
        vec![Some(2.0), Some(15.0), Some(2.0), Some(15.0)]
    );
    assert_eq!(values(&table, "lag"), vec![None, None, Some(1.0), Some(10.0)]);
}

#[test]
fn test_multi_column_groups() {
    let table = run(
        &panel(),
        &[Formula::mean("by_firm_year", "Revenue", &["Firm", "Year"])],
    )
    .unwrap();
    assert_eq!(
        values(&table, "by_firm_year"),
        vec![Some(100.0), Some(110.0), Some(50.0), Some(55.0)]
    );
}

#[test]
fn test_lag_notation() {
    let table = run(
        &panel(),
        &[
            Formula::expression("Growth", "Revenue / Revenue_lag1 - 1"),
            Formula::expression("Braces", "Revenue{1}"),
        ],
    )
    .unwrap();
    assert_close(&values(&table, "Growth"), &[None, Some(0.1), None, Some(0.1)]);
    assert_eq!(
        values(&table, "Braces"),
        vec![None, Some(100.0), None, Some(50.0)]
    );
    // Lag columns never reach the result table
    assert!(table.get("Revenue_lag1").is_none());
}

#[test]
fn test_function_named_columns_take_offsets() {
    let dataset = Dataset::from_columns(vec![
        Column::text(
            "Firm",
            ["A", "A", "B", "B"].iter().map(|s| Some(s.to_string())).collect(),
        ),
        Column::numbers("Year", vec![Some(1.0), Some(2.0), Some(1.0), Some(2.0)]),
        Column::numbers("Exp", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
    ])
    .unwrap();
    let formulas = [
        Formula::expression("prev_exp", "Exp(x-1)"),
        Formula::expression("Log", "Exp * 10"),
        Formula::expression("log_prev", "Log(x-1) + exp(0)"),
    ];

    let calc = VariableCalculator::new(&dataset, "Firm", "Year", &EngineConfig::default()).unwrap();
    let kinds: Vec<_> = calc.plan(&formulas).unwrap().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec!["row-relative", "expression", "row-relative"]);

    let table = calc.calculate_all(&formulas).unwrap();
    assert_eq!(values(&table, "prev_exp"), vec![None, Some(1.0), None, Some(3.0)]);
    assert_eq!(values(&table, "log_prev"), vec![None, Some(11.0), None, Some(31.0)]);
}

#[test]
fn test_boolean_expression_stored_as_number() {
    let table = run(
        &panel(),
        &[Formula::expression("big", "Revenue > 60 and not Revenue == 110")],
    )
    .unwrap();
    assert_eq!(
        values(&table, "big"),
        vec![Some(1.0), Some(0.0), Some(0.0), Some(0.0)]
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// STRUCTURAL ERRORS
// ═══════════════════════════════════════════════════════════════════════════

fn failure(formulas: &[Formula]) -> String {
    match run(&panel(), formulas) {
        Err(PanelError::Formula(f)) => f.to_string(),
        other => panic!("expected formula failure, got {:?}", other.map(|t| t.variables)),
    }
}

#[test]
fn test_unknown_column_fails_run() {
    let msg = failure(&[
        Formula::expression("ok", "Revenue * 2"),
        Formula::expression("bad", "Profit(x-1)"),
    ]);
    assert!(msg.contains("Formula 'bad' failed"), "{}", msg);
    assert!(msg.contains("Profit"), "{}", msg);
}

#[test]
fn test_malformed_offset_fails_run() {
    assert!(failure(&[Formula::expression("bad", "Revenue(x+1.5)")]).contains("'bad'"));
    assert!(failure(&[Formula::expression("bad", "Revenue(x) +")]).contains("'bad'"));
}

#[test]
fn test_unknown_aggregation_columns_fail_run() {
    assert!(failure(&[Formula::mean("m", "Profit", &["Firm"])]).contains("Profit"));
    assert!(failure(&[Formula::stdev("s", "Revenue", &["Sector"])]).contains("Sector"));
}

#[test]
fn test_bare_column_in_row_formula_fails() {
    let msg = failure(&[Formula::expression("bad", "Revenue(x) - Revenue")]);
    assert!(msg.contains("without an offset"), "{}", msg);
}

#[test]
fn test_function_name_without_column_is_reserved() {
    let msg = failure(&[Formula::expression("bad", "Round(x-1)")]);
    assert!(msg.contains("reserved function name"), "{}", msg);
}

#[test]
fn test_formula_cannot_overwrite_key_columns() {
    assert!(failure(&[Formula::expression("Firm", "Revenue")]).contains("entity"));
}

#[test]
fn test_wrong_arity_fails() {
    assert!(failure(&[Formula::expression("bad", "pow(Revenue)")]).contains("'bad'"));
}

#[test]
fn test_progress_reports_each_formula() {
    let dataset = panel();
    let calc = VariableCalculator::new(&dataset, "Firm", "Year", &EngineConfig::default()).unwrap();
    let mut seen = Vec::new();
    calc.calculate(
        &[
            Formula::expression("a", "Revenue + 1"),
            Formula::expression("b", "a(x-1)"),
            Formula::stdev("c", "b", &[]),
        ],
        &mut |done, total, name| seen.push((done, total, name.to_string())),
    )
    .unwrap();
    assert_eq!(
        seen,
        vec![
            (1, 3, "a".to_string()),
            (2, 3, "b".to_string()),
            (3, 3, "c".to_string()),
        ]
    );
}

#[test]
fn test_failed_run_reports_no_progress_after_failure() {
    let dataset = panel();
    let calc = VariableCalculator::new(&dataset, "Firm", "Year", &EngineConfig::default()).unwrap();
    let mut seen = 0;
    let result = calc.calculate(
        &[
            Formula::expression("a", "Revenue + 1"),
            Formula::expression("b", "Revenue * Firm"),
        ],
        &mut |_, _, _| seen += 1,
    );
    assert!(result.is_err());
    // The plan pass rejects the run before any formula is computed
    assert_eq!(seen, 0);
}

#[test]
fn test_key_columns_validated() {
    let dataset = panel();
    assert!(VariableCalculator::new(&dataset, "Firm", "Firm", &EngineConfig::default()).is_err());
    assert!(VariableCalculator::new(&dataset, "Firm", "Date", &EngineConfig::default()).is_err());
}
