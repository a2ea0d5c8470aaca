//! Health check for a portsync setup.

use anyhow::Result;

use portsync_core::config::AppConfig;
use portsync_core::preflight;
use portsync_core::GitClient;

use crate::style;

/// Check configuration, tools, repository and directories.
pub fn run_doctor(config: &AppConfig) -> Result<()> {
    println!();
    println!("{}", style::header("portsync Doctor"));
    println!("{}", "═".repeat(15));
    println!();

    let mut issues = Vec::new();

    // 1. Configuration
    match config.validate() {
        Ok(()) => println!("  {}", style::success("Configuration     Valid")),
        Err(e) => {
            println!("  {}", style::error(&format!("Configuration     {}", e)));
            issues.push("Fix configuration errors".to_string());
        }
    }

    // 2. External tools
    let tools = preflight::required_tools(config, false);
    if tools.is_empty() {
        println!(
            "  {}",
            style::dim("  ○ Tools             None required (builtin merge, build disabled)")
        );
    }
    for requirement in &tools {
        let label = format!("{:<18}", requirement.tool);
        match preflight::probe(requirement) {
            Ok(version) => println!("  {}", style::success(&format!("{}{}", label, version))),
            Err(e) => {
                println!("  {}", style::error(&format!("{}{}", label, e)));
                issues.push(format!(
                    "Install {} or fix its path in the configuration",
                    requirement.tool
                ));
            }
        }
    }

    // 3. Repository
    let repo_cfg = &config.repository;
    if !repo_cfg.path.exists() {
        println!(
            "  {}",
            style::warn(&format!(
                "Repository        {} (missing, cloned on first run)",
                repo_cfg.path.display()
            ))
        );
    } else {
        match GitClient::new(&repo_cfg.path) {
            Ok(client) => {
                println!(
                    "  {}",
                    style::success(&format!("Repository        {}", repo_cfg.path.display()))
                );

                match client.current_branch() {
                    Ok(branch) => println!(
                        "  {}",
                        style::success(&format!("Current Branch    {}", style::branch(&branch)))
                    ),
                    Err(e) => println!(
                        "  {}",
                        style::warn(&format!("Current Branch    {}", e))
                    ),
                }

                if let Ok(sha) = client.get_head_sha() {
                    println!(
                        "  {}",
                        style::success(&format!("HEAD              {}", &sha[..sha.len().min(10)]))
                    );
                }

                match client.list_branches() {
                    Ok(branches) => {
                        let prefix = format!("{}-", config.session.branch_prefix);
                        let previous = branches.iter().filter(|b| b.starts_with(&prefix)).count();
                        println!(
                            "  {}",
                            style::dim(&format!(
                                "  ○ Sync Branches     {} previous {}* branch(es)",
                                previous, prefix
                            ))
                        );
                    }
                    Err(e) => println!("  {}", style::warn(&format!("Sync Branches     {}", e))),
                }

                match client.is_clean() {
                    Ok(true) => println!("  {}", style::success("Working Tree      Clean")),
                    Ok(false) => {
                        println!("  {}", style::error("Working Tree      Dirty"));
                        issues.push(format!(
                            "Commit or discard local changes in {}",
                            repo_cfg.path.display()
                        ));
                    }
                    Err(e) => {
                        println!(
                            "  {}",
                            style::error(&format!("Working Tree      {}", e))
                        );
                        issues.push("Repository status could not be read".to_string());
                    }
                }

                for (label, name) in [
                    ("Push Remote", &repo_cfg.push_remote),
                    ("Upstream Remote", &repo_cfg.upstream_remote),
                ] {
                    let line = format!("{:<18}", label);
                    match client.repo().find_remote(name) {
                        Ok(remote) => println!(
                            "  {}",
                            style::success(&format!(
                                "{}{} ({})",
                                line,
                                name,
                                remote.url().unwrap_or("no url")
                            ))
                        ),
                        Err(_) if name == &repo_cfg.upstream_remote => println!(
                            "  {}",
                            style::dim(&format!(
                                "  ○ {}{} not configured (added on first run)",
                                line, name
                            ))
                        ),
                        Err(_) => {
                            println!(
                                "  {}",
                                style::error(&format!("{}{} missing", line, name))
                            );
                            issues.push(format!(
                                "Add the push remote: git remote add {} {}",
                                name, repo_cfg.origin_url
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                println!("  {}", style::error(&format!("Repository        {}", e)));
                issues.push(format!(
                    "{} exists but is not a git repository",
                    repo_cfg.path.display()
                ));
            }
        }
    }

    // 4. Recovery directory
    let recovery_dir = &config.session.recovery_dir;
    if recovery_dir.is_dir() {
        println!(
            "  {}",
            style::success(&format!("Recovery Dir      {}", recovery_dir.display()))
        );
    } else {
        println!(
            "  {}",
            style::dim(&format!(
                "  ○ Recovery Dir      {} (created on first conflict)",
                recovery_dir.display()
            ))
        );
    }

    // 5. Log file
    if let Some(ref log_file) = config.session.log_file {
        let dir = log_file.parent().filter(|p| !p.as_os_str().is_empty());
        match dir {
            Some(dir) if !dir.exists() => println!(
                "  {}",
                style::warn(&format!(
                    "Log File          {} (directory will be created)",
                    log_file.display()
                ))
            ),
            _ => println!(
                "  {}",
                style::success(&format!("Log File          {}", log_file.display()))
            ),
        }
    }

    // 6. Credentials
    if config.repository.token_env.is_some() && config.repository.token.is_none() {
        println!("  {}", style::warn("Token             Not set (anonymous fetch/push)"));
    }

    println!();
    if issues.is_empty() {
        println!(
            "  {} All checks passed!",
            console::style("✓").green().bold()
        );
    } else {
        println!(
            "  {} {} issue(s) found:",
            console::style("!").yellow().bold(),
            issues.len()
        );
        for (i, issue) in issues.iter().enumerate() {
            println!("    {}. {}", i + 1, issue);
        }
    }
    println!();

    Ok(())
}
