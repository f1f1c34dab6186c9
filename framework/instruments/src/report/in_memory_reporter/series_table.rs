use tabled::Tabled;

#[derive(Tabled)]
pub struct SeriesRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "MB/s", display = "float2")]
    pub bw: f64,
    #[tabled(rename = "IOPS", display = "float2")]
    pub iops: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
