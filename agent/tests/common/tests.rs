use anyhow::Context;

use crate::common::{
    empty_temp_dir,
    run::{combined_output, run_agent_output},
};

pub fn args_bad_config_no_folder(binary: &str) -> anyhow::Result<()> {
    let tmp_dir = empty_temp_dir(&format!("{binary}-args_bad_config_no_folder"))?;
    let bad_conf = tmp_dir.join("nonexistent").join("zzzzz.toml");

    let bad_conf_filename = bad_conf.to_str().unwrap();
    let output = run_agent_output(binary, &["--config", bad_conf_filename], &tmp_dir)?;
    assert!(
        !output.status.success(),
        "should fail because the config directory does not exist"
    );
    assert!(combined_output(&output).contains(bad_conf_filename));
    Ok(())
}

pub fn args_bad_config_missing_file_no_default(binary: &str) -> anyhow::Result<()> {
    let tmp_dir = empty_temp_dir(&format!("{binary}-args_bad_config_missing_file_no_default"))?;
    let bad_conf = tmp_dir.join("zzzzz.toml");

    let bad_conf_filename = bad_conf.to_str().unwrap();
    let output = run_agent_output(
        binary,
        &["--config", bad_conf_filename, "--no-default-config"],
        &tmp_dir,
    )?;
    assert!(
        !output.status.success(),
        "should fail because the config does not exist"
    );
    assert!(combined_output(&output).contains(bad_conf_filename));
    assert!(!bad_conf.exists(), "no default config should be written");
    Ok(())
}

pub fn args_regen_config(binary: &str) -> anyhow::Result<()> {
    let tmp_dir = empty_temp_dir(&format!("{binary}-args_regen_config"))?;
    let conf = tmp_dir.join("config.toml");
    assert!(!conf.try_exists()?, "config file should not exist: {conf:?}");

    let conf_path_str = conf.to_str().unwrap();
    let output = run_agent_output(binary, &["--config", conf_path_str, "config", "regen"], &tmp_dir)?;
    assert!(output.status.success(), "command should succeed");

    let conf_content =
        std::fs::read_to_string(&conf).with_context(|| format!("config should be generated to {conf:?}"))?;
    assert!(conf_content.contains("[agent]"), "missing [agent] in {conf_content}");
    assert!(conf_content.contains("[sampler]"), "missing [sampler] in {conf_content}");
    Ok(())
}
