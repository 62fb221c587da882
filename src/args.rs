use clap::Parser;

/// Tabulates the sense of safety reported in the ENSU survey, per municipality and quarter.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON configuration file. The other arguments override the values
    /// it contains. See the documentation of the perception_tally::manual module for its format.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (directory) The directory containing the survey releases. It is searched recursively.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (file path, 'stdout' or empty) Where to write the consolidated table in CSV format.
    /// By default, the table is written to the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path, optional) If specified, a summary of the run in JSON format is written there:
    /// what happened to every file, and why.
    #[clap(short, long, value_parser)]
    pub summary: Option<String>,

    /// (default YUCATAN) The federal entity to tabulate. Case and accents do not matter.
    #[clap(short, long, value_parser)]
    pub entity: Option<String>,

    /// If passed as an argument, the municipalities are further split by city.
    #[clap(long, takes_value = false)]
    pub group_by_city: bool,

    /// If passed as an argument, the periods already present in the output file are not
    /// processed again.
    #[clap(long, takes_value = false)]
    pub incremental: bool,

    /// (file path) A reference table in CSV format. If provided, ensutally will check that the
    /// tabulated output matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
