//! Command line and environment rendering
//!
//! The application's invocation is rendered into a shell script instead of
//! being passed as container arguments. Quoting is controlled here and the
//! output of each replica is redirected to its own log files in the job folder.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;

use ucloud_common::model::{AppParameterValue, ApplicationInvocation, InvocationParameter, Job};

use crate::mounts::{MountTable, WORK_DIR};

/// Quote a word for POSIX shells
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:@%+,".contains(&b))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn render_value(value: &AppParameterValue, mounts: &MountTable) -> Option<String> {
    match value {
        AppParameterValue::File { path, .. } => mounts.container_path(path).map(str::to_string),
        AppParameterValue::Text { value } => Some(value.clone()),
        AppParameterValue::Integer { value } => Some(value.to_string()),
        AppParameterValue::FloatingPoint { value } => Some(value.to_string()),
        AppParameterValue::Bool { value } => Some(value.to_string()),
        AppParameterValue::Peer { hostname, .. } => Some(hostname.clone()),
        AppParameterValue::Network { ip_address, .. } => ip_address.clone(),
        AppParameterValue::Ingress { .. } => None,
    }
}

/// A rendered command line fragment
#[derive(Clone, Debug, PartialEq, Eq)]
enum Fragment {
    /// Literal argument, quoted when written to the script
    Literal(String),
    /// Expanded by the shell
    Expand(String),
}

impl Fragment {
    fn to_shell(&self) -> String {
        match self {
            Fragment::Literal(s) => shell_quote(s),
            Fragment::Expand(var) => format!("\"${{{var}}}\""),
        }
    }

    fn into_env_value(self) -> String {
        match self {
            Fragment::Literal(s) => s,
            Fragment::Expand(var) => format!("$({var})"),
        }
    }
}

fn render_parameter(
    param: &InvocationParameter,
    values: &BTreeMap<String, AppParameterValue>,
    mounts: &MountTable,
) -> Option<Fragment> {
    match param {
        InvocationParameter::Word { word } => Some(Fragment::Literal(word.clone())),
        InvocationParameter::Var {
            variable,
            prefix,
            suffix,
        } => {
            let value = render_value(values.get(variable)?, mounts)?;
            Some(Fragment::Literal(format!("{prefix}{value}{suffix}")))
        }
        InvocationParameter::Flag { variable, flag } => match values.get(variable) {
            Some(AppParameterValue::Bool { value: true }) => Some(Fragment::Literal(flag.clone())),
            _ => None,
        },
        InvocationParameter::Env { variable } => Some(Fragment::Expand(variable.clone())),
    }
}

/// Variable carrying the parameters document into rank 0
pub const JOB_PARAMETERS_ENV: &str = "UCLOUD_JOB_PARAMETERS";

/// Parameters document in the job folder
pub const JOB_PARAMETERS_FILE: &str = "JobParameters.json";

/// The start script for one replica
///
/// With `write_parameters` the script first copies [`JOB_PARAMETERS_ENV`]
/// into [`JOB_PARAMETERS_FILE`] in the job folder.
pub fn start_script(
    invocation: &ApplicationInvocation,
    job: &Job,
    rank: u32,
    mounts: &MountTable,
    write_parameters: bool,
) -> String {
    let args: Vec<String> = invocation
        .invocation
        .iter()
        .filter_map(|p| render_parameter(p, &job.specification.parameters, mounts))
        .map(|f| f.to_shell())
        .collect();
    let command = if args.is_empty() {
        ":".to_string()
    } else {
        args.join(" ")
    };

    let mut script = String::new();
    script.push_str("#!/usr/bin/env sh\n");
    if write_parameters {
        script.push_str(&format!(
            "printf '%s\\n' \"${{{JOB_PARAMETERS_ENV}}}\" > {}\n",
            shell_quote(&format!("{WORK_DIR}/{JOB_PARAMETERS_FILE}")),
        ));
    }
    script.push_str(&format!(
        "{{ {command} ; }} > {} 2> {}\n",
        shell_quote(&format!("{WORK_DIR}/stdout-{rank}.log")),
        shell_quote(&format!("{WORK_DIR}/stderr-{rank}.log")),
    ));
    script
}

/// Identity variables under every naming convention applications rely on
pub fn identity_env(job_id: &str, rank: u32, replicas: u32) -> Vec<EnvVar> {
    let vars = [
        ("UCLOUD_JOB_ID", job_id.to_string()),
        ("JOB_ID", job_id.to_string()),
        ("UCLOUD_RANK", rank.to_string()),
        ("NODE_RANK", rank.to_string()),
        ("RANK", rank.to_string()),
        ("UCLOUD_NUMBER_OF_NODES", replicas.to_string()),
        ("NUMBER_OF_NODES", replicas.to_string()),
        ("REPLICAS", replicas.to_string()),
    ];
    vars.into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value),
            ..Default::default()
        })
        .collect()
}

/// Environment declared by the application, rendered from the job's parameters
///
/// `Env` fragments use Kubernetes `$(VAR)` expansion.
pub fn application_env(
    invocation: &ApplicationInvocation,
    job: &Job,
    mounts: &MountTable,
) -> Vec<EnvVar> {
    invocation
        .environment
        .iter()
        .filter_map(|(name, param)| {
            let value = render_parameter(param, &job.specification.parameters, mounts)?;
            Some(EnvVar {
                name: name.clone(),
                value: Some(value.into_env_value()),
                ..Default::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounts::test_support::StaticResolver;
    use crate::mounts::{resolve_mounts, MountRequest};
    use ucloud_common::model::{
        JobOwner, JobSpecification, JobStatus, NameAndVersion, ProductReference,
    };

    fn job_with(params: Vec<(&str, AppParameterValue)>) -> Job {
        Job {
            id: "12".to_string(),
            owner: JobOwner::default(),
            specification: JobSpecification {
                application: NameAndVersion::default(),
                product: ProductReference::default(),
                name: None,
                replicas: 1,
                parameters: params
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                resources: vec![],
                time_allocation: None,
                ssh_enabled: false,
            },
            status: JobStatus::default(),
            updates: vec![],
        }
    }

    fn word(w: &str) -> InvocationParameter {
        InvocationParameter::Word {
            word: w.to_string(),
        }
    }

    fn var(v: &str) -> InvocationParameter {
        InvocationParameter::Var {
            variable: v.to_string(),
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-word_1.txt"), "plain-word_1.txt");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_script_renders_parameters_and_redirects_per_rank() {
        let job = job_with(vec![
            (
                "input",
                AppParameterValue::File {
                    path: "/1/data".to_string(),
                    read_only: true,
                },
            ),
            (
                "msg",
                AppParameterValue::Text {
                    value: "hello world".to_string(),
                },
            ),
            ("verbose", AppParameterValue::Bool { value: true }),
            ("quiet", AppParameterValue::Bool { value: false }),
        ]);
        let mounts = resolve_mounts(
            "12",
            &[MountRequest {
                path: "/1/data".to_string(),
                read_only: true,
            }],
            &StaticResolver { drives: vec!["1"] },
        )
        .unwrap();

        let invocation = ApplicationInvocation {
            invocation: vec![
                word("run.sh"),
                var("input"),
                var("msg"),
                var("missing"),
                InvocationParameter::Flag {
                    variable: "verbose".to_string(),
                    flag: "-v".to_string(),
                },
                InvocationParameter::Flag {
                    variable: "quiet".to_string(),
                    flag: "-q".to_string(),
                },
                InvocationParameter::Var {
                    variable: "msg".to_string(),
                    prefix: "--say=".to_string(),
                    suffix: String::new(),
                },
                InvocationParameter::Env {
                    variable: "HOME".to_string(),
                },
            ],
            ..Default::default()
        };

        let script = start_script(&invocation, &job, 3, &mounts, false);
        assert!(script.starts_with("#!/usr/bin/env sh\n"));
        assert!(script.contains(
            "{ run.sh /work/data 'hello world' -v '--say=hello world' \"${HOME}\" ; }"
        ));
        assert!(script.contains("> /work/stdout-3.log 2> /work/stderr-3.log"));
        assert!(!script.contains("-q"));
    }

    #[test]
    fn test_script_without_arguments_is_a_no_op() {
        let job = job_with(vec![("msg", AppParameterValue::Bool { value: false })]);
        let invocation = ApplicationInvocation {
            invocation: vec![var("missing")],
            ..Default::default()
        };
        let script = start_script(&invocation, &job, 0, &MountTable::default(), false);
        assert!(script.contains("{ : ; } > /work/stdout-0.log"));
        assert!(!script.contains("{  ;"));
    }

    #[test]
    fn test_script_writes_parameters_before_running() {
        let job = job_with(vec![]);
        let invocation = ApplicationInvocation {
            invocation: vec![word("run.sh")],
            ..Default::default()
        };
        let script = start_script(&invocation, &job, 0, &MountTable::default(), true);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines[1],
            "printf '%s\\n' \"${UCLOUD_JOB_PARAMETERS}\" > /work/JobParameters.json"
        );
        assert!(lines[2].starts_with("{ run.sh ; }"));
    }

    #[test]
    fn test_identity_env_covers_legacy_names() {
        let env = identity_env("12", 1, 4);
        let get = |n: &str| {
            env.iter()
                .find(|e| e.name == n)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(get("UCLOUD_JOB_ID").as_deref(), Some("12"));
        assert_eq!(get("JOB_ID").as_deref(), Some("12"));
        assert_eq!(get("UCLOUD_RANK").as_deref(), Some("1"));
        assert_eq!(get("NODE_RANK").as_deref(), Some("1"));
        assert_eq!(get("UCLOUD_NUMBER_OF_NODES").as_deref(), Some("4"));
        assert_eq!(get("REPLICAS").as_deref(), Some("4"));
    }

    #[test]
    fn test_application_env_renders_values() {
        let job = job_with(vec![("threads", AppParameterValue::Integer { value: 8 })]);
        let invocation = ApplicationInvocation {
            environment: BTreeMap::from([
                ("OMP_NUM_THREADS".to_string(), var("threads")),
                ("UNSET".to_string(), var("nope")),
                (
                    "HOME_COPY".to_string(),
                    InvocationParameter::Env {
                        variable: "HOME".to_string(),
                    },
                ),
            ]),
            ..Default::default()
        };
        let env = application_env(&invocation, &job, &MountTable::default());
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].name, "HOME_COPY");
        assert_eq!(env[0].value.as_deref(), Some("$(HOME)"));
        assert_eq!(env[1].name, "OMP_NUM_THREADS");
        assert_eq!(env[1].value.as_deref(), Some("8"));
    }
}
