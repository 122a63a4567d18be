use argp::FromArgs;

/// Top-level command
#[derive(FromArgs, PartialEq, Debug)]
#[argp(description = "Smash formats together.")]
pub struct Polybin {
    #[argp(option, short = 'v', default = "0")]
    #[argp(description = "logging level (0 = Off, 1 = Error, 2 = Warn, 3 = Info, 4 = Debug, 5 = Trace)")]
    pub verbose: usize,

    /// file to write the polyglot output to
    #[argp(positional)]
    pub output: String,

    /// ICO input to fold into the output
    #[argp(option)]
    pub ico: Option<String>,

    /// MP4 input to fold into the output
    #[argp(option)]
    pub mp4: Option<String>,

    /// ZIP input to fold into the output (repeatable)
    #[argp(option)]
    pub zip: Vec<String>,
}
