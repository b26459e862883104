const LOGIN_TEMPLATE: &str = include_str!("templates/login.html");
const EDITOR_TEMPLATE: &str = include_str!("templates/editor.html");

const DEBUG_PLACEHOLDER: &str = "{{DEBUG_NOTICE}}";
const DEBUG_NOTICE: &str = "<div class=\"debug-notice\">Debug mode: login is bypassed and \
     nothing is pushed to GitHub. Published posts are shown below the form.</div>";

/// The editor for an authenticated operator, otherwise the login form.
pub fn render(authenticated: bool, debug_mode: bool) -> String {
    let template = if authenticated {
        EDITOR_TEMPLATE
    } else {
        LOGIN_TEMPLATE
    };
    let notice = if debug_mode { DEBUG_NOTICE } else { "" };
    template.replace(DEBUG_PLACEHOLDER, notice)
}
