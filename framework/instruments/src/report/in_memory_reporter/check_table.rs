use tabled::Tabled;

#[derive(Tabled)]
pub struct CheckRow {
    pub test_case: String,
    pub workload: String,
    pub check: String,
    pub metric: String,
    pub expected: String,
    #[tabled(display = "opt_float2")]
    pub reference: Option<f64>,
    #[tabled(display = "opt_float2")]
    pub actual: Option<f64>,
    pub verdict: String,
}

#[derive(Tabled)]
pub struct TestCaseRow {
    pub test_case: String,
    pub workload: String,
    pub checks: usize,
    pub failed: usize,
    pub skipped: usize,
    pub result: String,
}

fn opt_float2(n: &Option<f64>) -> String {
    match n {
        Some(n) => format!("{:.2}", n),
        None => "-".to_string(),
    }
}
