use assert_cmd::Command;

pub fn companiond_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("companiond").expect("companiond test binary should build")
    }
}
